//! Resolver caches: RRsets, whole answers and upstream server knowledge.
//!
//! All three are shared by every worker; each sits on a sharded LRU
//! table with per-entry locks.

pub mod infra;
pub mod message;
pub mod metrics;
pub mod rrset;
pub mod rtt;
pub mod slab;

pub use infra::{HostInfo, HostRto, InfraCache, InfraKey, LameRtt, RttSample};
pub use message::{CachedReply, MessageCache};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use rrset::{LockedRrsets, RrsetCache, RrsetHandle, RrsetRef, UnlockedRrsets, UpdateOutcome};
pub use rtt::RttInfo;

use meshdns_application::ReplyCache;
use meshdns_domain::{Config, QueryKey, ReplyInfo};
use std::sync::Arc;
use tracing::trace;

/// The caches every worker of one resolver shares.
#[derive(Clone)]
pub struct SharedCaches {
    pub rrsets: Arc<RrsetCache>,
    pub messages: Arc<MessageCache>,
    pub infra: Arc<InfraCache>,
}

impl SharedCaches {
    pub fn new(config: &Config) -> Self {
        let rrsets = Arc::new(RrsetCache::new(&config.cache));
        let messages = Arc::new(MessageCache::new(&config.cache, Arc::clone(&rrsets)));
        let infra = Arc::new(InfraCache::new(&config.infra));
        Self {
            rrsets,
            messages,
            infra,
        }
    }
}

impl ReplyCache for SharedCaches {
    fn store_reply(
        &self,
        key: &QueryKey,
        reply: &ReplyInfo,
        leeway: u64,
        is_referral: bool,
        now: u64,
    ) -> bool {
        self.messages.store(key, reply, leeway, is_referral, false, now)
    }

    fn lookup_reply(&self, key: &QueryKey, now: u64) -> Option<ReplyInfo> {
        let cached = self.messages.lookup(key, now)?;
        let Some(locked) = self.rrsets.array_lock(&cached.refs, now) else {
            trace!(query = %key, "Cached answer references stale RRsets");
            return None;
        };
        match cached.reconstitute(&locked, now) {
            Some(rep) => {
                locked.unlock_and_touch(&self.rrsets);
                Some(rep)
            }
            None => {
                drop(locked.unlock());
                None
            }
        }
    }
}
