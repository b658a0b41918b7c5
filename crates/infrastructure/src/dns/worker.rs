//! Worker front end: answers client queries from the shared caches when
//! it can and hands everything else to its own mesh.

use super::cache::{CachedReply, SharedCaches};
use super::mesh::{Admission, MeshArea};
use meshdns_application::{
    ClientAnswer, ClientQuery, NetEvent, OutboundEntry, OutboundSender, ReplyChannel,
    ResolutionModule,
};
use meshdns_domain::{header, Config, DomainError, QueryKey, Rcode, SecurityStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// How a client query was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Answered from the cache.
    CacheHit,
    /// Answered from the cache and a refresh was started.
    CacheHitPrefetch,
    /// Handed to the mesh.
    Mesh(Admission),
}

pub struct Worker {
    id: usize,
    caches: SharedCaches,
    mesh: MeshArea,
    prefetch: bool,
    prefetch_expiry_add: u64,
    ignore_cd: bool,
}

impl Worker {
    pub fn new(
        id: usize,
        caches: SharedCaches,
        config: &Config,
        modules: Vec<Box<dyn ResolutionModule>>,
        sender: Box<dyn OutboundSender>,
    ) -> Result<Self, DomainError> {
        let mut mesh = MeshArea::new(modules, &config.mesh, sender)?;
        mesh.set_cache(Arc::new(caches.clone()));
        info!(worker = id, prefetch = config.cache.prefetch, "Worker started");
        Ok(Self {
            id,
            caches,
            mesh,
            prefetch: config.cache.prefetch,
            prefetch_expiry_add: config.cache.prefetch_expiry_add,
            ignore_cd: config.mesh.ignore_cd_flag,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current time from the worker's event loop.
    pub fn set_now(&mut self, secs: u64, now: Instant) {
        self.mesh.set_now(secs, now);
    }

    pub fn caches(&self) -> &SharedCaches {
        &self.caches
    }

    pub fn mesh(&self) -> &MeshArea {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut MeshArea {
        &mut self.mesh
    }

    pub fn handle_query(&mut self, query: ClientQuery, mut channel: Box<dyn ReplyChannel>) -> QueryOutcome {
        let key = query.key();
        let now = self.mesh.now_secs();

        let Some((answer, cached)) = self.answer_from_cache(&query, &key, now) else {
            return QueryOutcome::Mesh(self.mesh.new_client(query, channel));
        };
        channel.send_answer(answer);

        if self.prefetch && now >= cached.prefetch_ttl() {
            let leeway = cached.ttl.saturating_sub(now) + self.prefetch_expiry_add;
            self.caches
                .messages
                .prefetch_adjust(&key, self.prefetch_expiry_add);
            debug!(worker = self.id, query = %key, leeway, "Prefetching cached answer");
            self.mesh.new_prefetch(key.qinfo.clone(), key.flags, leeway);
            return QueryOutcome::CacheHitPrefetch;
        }
        QueryOutcome::CacheHit
    }

    /// Builds the answer from a cached reply, or `None` when the cache
    /// cannot be used and the query has to be resolved.
    fn answer_from_cache(
        &self,
        query: &ClientQuery,
        key: &QueryKey,
        now: u64,
    ) -> Option<(ClientAnswer, Arc<CachedReply>)> {
        let cached = self.caches.messages.lookup(key, now)?;
        let rrsets = self.caches.messages.rrsets();
        let Some(locked) = rrsets.array_lock(&cached.refs, now) else {
            trace!(query = %key, "Cached answer references stale RRsets");
            return None;
        };

        let must_validate = self.mesh.need_to_validate()
            && (query.flags & header::CD == 0 || self.ignore_cd);
        if cached.security == SecurityStatus::Unchecked && must_validate {
            trace!(query = %key, "Cached answer needs validation");
            drop(locked.unlock());
            return None;
        }

        let mut answer = ClientAnswer {
            query_id: query.query_id,
            query_flags: query.flags,
            qname: query.qinfo.qname.clone(),
            qtype: query.qinfo.qtype,
            qclass: query.qinfo.qclass,
            rcode: Rcode::ServFail,
            reply: None,
            secure: false,
            edns: query.edns,
        };
        if cached.security == SecurityStatus::Bogus && must_validate {
            debug!(query = %key, "Cached answer is bogus");
            locked.unlock_and_touch(rrsets);
            return Some((answer, cached));
        }

        let Some(rep) = cached.reconstitute(&locked, now) else {
            drop(locked.unlock());
            return None;
        };
        if cached.security == SecurityStatus::Secure {
            if rep.all_rrsets_secure() {
                answer.secure = true;
            } else if must_validate {
                trace!(query = %key, "Cached secure answer changed status");
                drop(locked.unlock());
                return None;
            }
        }
        locked.unlock_and_touch(rrsets);

        answer.rcode = Rcode::from_u8(rep.rcode()).unwrap_or(Rcode::ServFail);
        answer.reply = Some(Arc::new(rep));
        trace!(worker = self.id, query = %key, "Answered from cache");
        Some((answer, cached))
    }

    /// An upstream query finished or failed.
    pub fn handle_outbound_result(&mut self, entry: OutboundEntry, event: NetEvent) {
        self.mesh.report_reply(entry, event);
    }

    /// Drops every pending query; called when the worker stops.
    pub fn shutdown(&mut self) {
        self.mesh.log_stats("worker shutdown");
        self.mesh.delete_all();
    }
}
