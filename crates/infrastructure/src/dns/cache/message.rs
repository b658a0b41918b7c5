use super::metrics::CacheMetrics;
use super::rrset::{LockedRrsets, RrsetCache, RrsetRef};
use super::slab::{SlabKey, SlabTable, SlabValue};
use meshdns_domain::{
    header, prefetch_ttl_for, CacheConfig, PackedRrset, QueryKey, RecordType, ReplyInfo,
    SecurityStatus,
};
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, trace};

impl SlabKey for QueryKey {
    fn mem_size(&self) -> usize {
        size_of::<QueryKey>() + self.qinfo.qname.wire_len()
    }
}

/// Cached answer skeleton. The records themselves stay in the RRset
/// cache; `refs` must be array-locked before they are read.
#[derive(Debug)]
pub struct CachedReply {
    pub flags: u16,
    pub qdcount: u8,
    /// Absolute expiry second.
    pub ttl: u64,
    prefetch_ttl: AtomicU64,
    pub security: SecurityStatus,
    pub an_numrrsets: usize,
    pub ns_numrrsets: usize,
    pub ar_numrrsets: usize,
    pub refs: Vec<RrsetRef>,
}

impl CachedReply {
    /// Absolute second after which a hit should trigger a prefetch.
    pub fn prefetch_ttl(&self) -> u64 {
        self.prefetch_ttl.load(AtomicOrdering::Relaxed)
    }

    /// Copies the referenced RRsets out of the locked set with TTLs
    /// relative to `now`. `None` if a reference is not part of `locked`.
    pub fn reconstitute(&self, locked: &LockedRrsets, now: u64) -> Option<ReplyInfo> {
        let mut rrsets = Vec::with_capacity(self.refs.len());
        for rref in &self.refs {
            let data = locked.get(rref)?;
            rrsets.push(PackedRrset::new(rref.key().clone(), data.relative_to(now)));
        }
        Some(ReplyInfo {
            flags: self.flags,
            qdcount: self.qdcount,
            ttl: self.ttl.saturating_sub(now),
            prefetch_ttl: self.prefetch_ttl().saturating_sub(now),
            security: self.security,
            an_numrrsets: self.an_numrrsets,
            ns_numrrsets: self.ns_numrrsets,
            ar_numrrsets: self.ar_numrrsets,
            rrsets,
            authoritative_only: false,
        })
    }
}

struct MessageSlot {
    reply: Arc<CachedReply>,
}

impl SlabValue for MessageSlot {
    fn mem_size(&self) -> usize {
        size_of::<CachedReply>() + self.reply.refs.len() * size_of::<RrsetRef>()
    }
}

pub struct MessageCache {
    table: SlabTable<QueryKey, MessageSlot>,
    rrsets: Arc<RrsetCache>,
}

impl MessageCache {
    pub fn new(config: &CacheConfig, rrsets: Arc<RrsetCache>) -> Self {
        Self::with_capacity(config.msg_cache_slabs, config.msg_cache_size, rrsets)
    }

    pub fn with_capacity(slabs: usize, max_mem: usize, rrsets: Arc<RrsetCache>) -> Self {
        Self {
            table: SlabTable::new("message", slabs, max_mem),
            rrsets,
        }
    }

    pub fn rrsets(&self) -> &Arc<RrsetCache> {
        &self.rrsets
    }

    /// Cached answer for `key`, unless absent or expired. The returned
    /// skeleton holds no locks.
    pub fn lookup(&self, key: &QueryKey, now: u64) -> Option<Arc<CachedReply>> {
        let key = key.message_key();
        let hash = SlabTable::<QueryKey, MessageSlot>::hash_key(&key);
        let reply = self
            .table
            .lookup(hash, &key, false)
            .map(|guard| Arc::clone(&guard.value().reply));
        match reply {
            Some(reply) if now <= reply.ttl => {
                self.table.metrics().record_hit();
                Some(reply)
            }
            _ => {
                self.table.metrics().record_miss();
                None
            }
        }
    }

    /// Stores a module-produced reply (TTLs relative).
    ///
    /// Every RRset goes into the RRset cache first; the skeleton then keeps
    /// references to whatever copies the RRset cache holds. Referrals only
    /// store their RRsets. `leeway` lets a prefetch replace entries that
    /// expire within that many seconds. Returns whether a message entry was
    /// published.
    pub fn store(
        &self,
        key: &QueryKey,
        reply: &ReplyInfo,
        leeway: u64,
        is_referral: bool,
        parent_side: bool,
        now: u64,
    ) -> bool {
        if reply.authoritative_only {
            trace!(query = %key, "Authoritative-only answer not cached");
            return false;
        }

        if is_referral {
            self.store_rrsets(reply, now, leeway, parent_side);
            return false;
        }

        if reply.ttl == 0 {
            // records still refresh the RRset cache, the answer is not kept
            self.store_rrsets(reply, now, leeway, parent_side);
            debug!(query = %key, "TTL 0 answer not stored in message cache");
            return false;
        }

        let refs = self.store_rrsets(reply, now, leeway, parent_side);
        let mut flags = reply.flags | header::RA | header::QR;
        flags &= !(header::AA | header::CD);
        let cached = CachedReply {
            flags,
            qdcount: reply.qdcount,
            ttl: reply.ttl + now,
            prefetch_ttl: AtomicU64::new(prefetch_ttl_for(reply.ttl) + now),
            security: reply.security,
            an_numrrsets: reply.an_numrrsets,
            ns_numrrsets: reply.ns_numrrsets,
            ar_numrrsets: reply.ar_numrrsets,
            refs,
        };

        let key = key.message_key();
        let hash = SlabTable::<QueryKey, MessageSlot>::hash_key(&key);
        self.table.insert(
            hash,
            key,
            MessageSlot {
                reply: Arc::new(cached),
            },
        );
        true
    }

    fn store_rrsets(
        &self,
        reply: &ReplyInfo,
        now: u64,
        leeway: u64,
        parent_side: bool,
    ) -> Vec<RrsetRef> {
        reply
            .rrsets
            .iter()
            .map(|rrset| {
                let mut candidate = rrset.clone();
                candidate.data.add_now(now);
                let update_time = if rrset.key.rtype == RecordType::NS && !parent_side {
                    now
                } else {
                    now + leeway
                };
                self.rrsets.update(candidate, update_time).1
            })
            .collect()
    }

    /// Pushes the prefetch threshold of a cached answer out by
    /// `extra_seconds`. Returns false when nothing is cached for `key`.
    pub fn prefetch_adjust(&self, key: &QueryKey, extra_seconds: u64) -> bool {
        let key = key.message_key();
        let hash = SlabTable::<QueryKey, MessageSlot>::hash_key(&key);
        let Some(guard) = self.table.lookup(hash, &key, true) else {
            return false;
        };
        guard
            .value()
            .reply
            .prefetch_ttl
            .fetch_add(extra_seconds, AtomicOrdering::Relaxed);
        true
    }

    pub fn remove(&self, key: &QueryKey) -> bool {
        let key = key.message_key();
        let hash = SlabTable::<QueryKey, MessageSlot>::hash_key(&key);
        self.table.remove(hash, &key)
    }

    pub fn metrics(&self) -> &CacheMetrics {
        self.table.metrics()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn mem_used(&self) -> usize {
        self.table.mem_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use meshdns_domain::{
        DomainName, QueryFlags, QueryInfo, RecordClass, RrsetData, RrsetKey, RrsetTrust,
    };

    const NOW: u64 = 50_000;

    fn key(name: &str) -> QueryKey {
        QueryKey::client(
            QueryInfo::new(DomainName::new(name).unwrap(), RecordType::A, RecordClass::IN),
            QueryFlags::recursive(),
        )
    }

    fn answer(name: &str, ttl: u64) -> ReplyInfo {
        let rrset = PackedRrset::new(
            RrsetKey::new(DomainName::new(name).unwrap(), RecordType::A, RecordClass::IN, 0),
            RrsetData::new(
                ttl,
                vec![Bytes::from_static(b"\xc0\x00\x02\x01")],
                0,
                RrsetTrust::AnswerAa,
            ),
        );
        ReplyInfo::new(header::QR | header::AA | header::RD, vec![rrset], 1, 0, 0)
    }

    fn caches() -> MessageCache {
        let rrsets = Arc::new(RrsetCache::with_capacity(4, 1 << 20));
        MessageCache::with_capacity(4, 1 << 20, rrsets)
    }

    #[test]
    fn test_store_then_lookup_round_trip() {
        let cache = caches();
        assert!(cache.store(&key("www.example.com"), &answer("www.example.com", 300), 0, false, false, NOW));

        let cached = cache.lookup(&key("www.example.com"), NOW + 100).unwrap();
        assert_eq!(cached.ttl, NOW + 300);
        assert_eq!(cached.prefetch_ttl(), NOW + 270);
        assert_eq!(cached.flags & header::AA, 0);
        assert_ne!(cached.flags & header::RA, 0);

        let locked = cache.rrsets().array_lock(&cached.refs, NOW + 100).unwrap();
        let rep = cached.reconstitute(&locked, NOW + 100).unwrap();
        locked.unlock_and_touch(cache.rrsets());
        assert_eq!(rep.ttl, 200);
        assert_eq!(rep.rrsets[0].data.ttl, 200);
        assert_eq!(&rep.rrsets[0].data.rdata[0][..], b"\xc0\x00\x02\x01");
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = caches();
        cache.store(&key("a.example"), &answer("a.example", 60), 0, false, false, NOW);
        assert!(cache.lookup(&key("a.example"), NOW + 60).is_some());
        assert!(cache.lookup(&key("a.example"), NOW + 61).is_none());
    }

    #[test]
    fn test_referral_stores_only_rrsets() {
        let cache = caches();
        assert!(!cache.store(&key("a.example"), &answer("a.example", 60), 0, true, false, NOW));
        assert!(cache.lookup(&key("a.example"), NOW).is_none());
        assert!(cache
            .rrsets()
            .lookup(&DomainName::new("a.example").unwrap(), RecordType::A, RecordClass::IN, 0, NOW, false)
            .is_some());
    }

    #[test]
    fn test_authoritative_only_is_not_cached() {
        let cache = caches();
        let mut rep = answer("a.example", 60);
        rep.authoritative_only = true;
        assert!(!cache.store(&key("a.example"), &rep, 0, false, false, NOW));
        assert!(cache.lookup(&key("a.example"), NOW).is_none());
        assert!(cache.rrsets().is_empty());
    }

    #[test]
    fn test_zero_ttl_answer_is_not_published() {
        let cache = caches();
        assert!(!cache.store(&key("a.example"), &answer("a.example", 0), 0, false, false, NOW));
        assert!(cache.lookup(&key("a.example"), NOW).is_none());
    }

    #[test]
    fn test_prefetch_adjust_moves_threshold_only() {
        let cache = caches();
        cache.store(&key("a.example"), &answer("a.example", 100), 0, false, false, NOW);
        assert!(cache.prefetch_adjust(&key("a.example"), 30));
        let cached = cache.lookup(&key("a.example"), NOW).unwrap();
        assert_eq!(cached.prefetch_ttl(), NOW + 90 + 30);
        assert_eq!(cached.ttl, NOW + 100);
        assert!(!cache.prefetch_adjust(&key("missing.example"), 30));
    }

    #[test]
    fn test_lookup_ignores_rd_flag() {
        let cache = caches();
        cache.store(&key("a.example"), &answer("a.example", 100), 0, false, false, NOW);
        let mut norec = key("a.example");
        norec.flags.rd = false;
        assert!(cache.lookup(&norec, NOW).is_some());
    }

    #[test]
    fn test_stale_rrset_invalidates_answer() {
        let cache = caches();
        cache.store(&key("a.example"), &answer("a.example", 100), 0, false, false, NOW);
        cache
            .rrsets()
            .remove(&DomainName::new("a.example").unwrap(), RecordType::A, RecordClass::IN, 0);
        let cached = cache.lookup(&key("a.example"), NOW).unwrap();
        assert!(cache.rrsets().array_lock(&cached.refs, NOW).is_none());
    }

    #[test]
    fn test_store_computes_prefetch_threshold() {
        let cache = caches();
        let mut rep = answer("a.example", 300);
        rep.prefetch_ttl = 0;
        assert!(cache.store(&key("a.example"), &rep, 0, false, false, 1000));

        let cached = cache.lookup(&key("a.example"), 1000).unwrap();
        assert_eq!(cached.ttl, 1300);
        assert_eq!(cached.prefetch_ttl(), 1270);
    }
}
