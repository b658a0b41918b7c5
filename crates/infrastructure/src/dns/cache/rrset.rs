use super::metrics::CacheMetrics;
use super::slab::{EntryGuard, EntryRef, SlabKey, SlabTable, SlabValue, Upsert};
use meshdns_domain::{
    CacheConfig, DomainName, PackedRrset, RecordClass, RecordType, RrsetData, RrsetKey,
    SecurityStatus,
};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;
use smallvec::SmallVec;
use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, trace};

impl SlabKey for RrsetKey {
    fn mem_size(&self) -> usize {
        RrsetKey::mem_size(self)
    }
}

/// Cached RRset value: the data plus the identifier that proves a
/// reference to it is still current. Identifier 0 means deleted.
#[derive(Debug)]
pub struct RrsetSlot {
    id: u64,
    data: RrsetData,
}

impl RrsetSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data(&self) -> &RrsetData {
        &self.data
    }
}

impl SlabValue for RrsetSlot {
    fn mem_size(&self) -> usize {
        size_of::<u64>() + self.data.mem_size()
    }

    fn mark_deleted(&mut self) {
        self.id = 0;
    }
}

type RrsetEntryRef = EntryRef<RrsetKey, RrsetSlot>;

/// Reference to a cached RRset: the entry plus the identifier it had when
/// the reference was taken.
#[derive(Clone)]
pub struct RrsetRef {
    entry: RrsetEntryRef,
    id: u64,
}

impl RrsetRef {
    pub fn key(&self) -> &RrsetKey {
        self.entry.key()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn same_entry(&self, other: &RrsetRef) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// True when no lock is held on the referenced entry.
    pub fn is_unlocked(&self) -> bool {
        self.entry.is_unlocked()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.entry) as usize
    }
}

impl fmt::Debug for RrsetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RrsetRef")
            .field("key", self.key())
            .field("id", &self.id)
            .finish()
    }
}

/// A locked RRset returned by [`RrsetCache::lookup`]. Drop it before the
/// next call into any cache.
pub struct RrsetHandle {
    guard: EntryGuard<RrsetKey, RrsetSlot>,
}

impl RrsetHandle {
    pub fn key(&self) -> &RrsetKey {
        self.guard.entry().key()
    }

    pub fn id(&self) -> u64 {
        self.guard.value().id
    }

    pub fn data(&self) -> &RrsetData {
        &self.guard.value().data
    }

    /// `None` unless the lookup asked for a write lock.
    pub fn data_mut(&mut self) -> Option<&mut RrsetData> {
        self.guard.value_mut().map(|slot| &mut slot.data)
    }

    pub fn to_ref(&self) -> RrsetRef {
        RrsetRef {
            entry: Arc::clone(self.guard.entry()),
            id: self.id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The cached copy was kept; the returned reference points at it.
    Rejected,
    /// The candidate was stored, with no equal data cached before.
    Inserted,
    /// The candidate replaced cached data that was byte-equal.
    InsertedEquivalent,
}

struct LockedEntry {
    rref: RrsetRef,
    guard: ArcRwLockReadGuard<RawRwLock, RrsetSlot>,
}

/// Read locks on every distinct entry of an answer, all verified current.
pub struct LockedRrsets {
    entries: SmallVec<[LockedEntry; 8]>,
}

impl LockedRrsets {
    /// Data of a referenced RRset while the locks are held.
    pub fn get(&self, rref: &RrsetRef) -> Option<&RrsetData> {
        self.entries
            .iter()
            .find(|locked| locked.rref.same_entry(rref))
            .map(|locked| &locked.guard.data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Releases every lock. The returned set is the only way to ask for
    /// an LRU touch of the entries, so touching cannot happen while an
    /// entry lock is held.
    pub fn unlock(self) -> UnlockedRrsets {
        let refs = self
            .entries
            .into_iter()
            .map(|locked| {
                drop(locked.guard);
                locked.rref
            })
            .collect();
        UnlockedRrsets { refs }
    }

    pub fn unlock_and_touch(self, cache: &RrsetCache) {
        cache.touch_all(self.unlock());
    }
}

pub struct UnlockedRrsets {
    refs: SmallVec<[RrsetRef; 8]>,
}

struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        loop {
            let id = self.next.fetch_add(1, AtomicOrdering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// Decides whether a candidate RRset should replace the cached one.
/// May clamp the candidate's TTLs (NS sets keep the cached TTL).
fn need_to_update(
    candidate: &mut RrsetData,
    cached: &RrsetData,
    now: u64,
    equal: bool,
    is_ns: bool,
) -> bool {
    if candidate.security == SecurityStatus::Secure && cached.security != SecurityStatus::Secure {
        return true;
    }
    if cached.security == SecurityStatus::Bogus
        && candidate.security != SecurityStatus::Bogus
        && !equal
    {
        return true;
    }
    if candidate.trust > cached.trust {
        // let an equal bogus set expire instead of refreshing it
        return !(equal && cached.ttl >= now && cached.security == SecurityStatus::Bogus);
    }
    if cached.ttl < now {
        return true;
    }
    if candidate.trust == cached.trust && !equal {
        if is_ns {
            candidate.ttl = cached.ttl;
            for ttl in candidate.rr_ttl.iter_mut() {
                if *ttl > candidate.ttl {
                    *ttl = candidate.ttl;
                }
            }
        }
        return true;
    }
    false
}

pub struct RrsetCache {
    table: SlabTable<RrsetKey, RrsetSlot>,
    ids: IdAllocator,
}

impl RrsetCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_capacity(config.rrset_cache_slabs, config.rrset_cache_size)
    }

    pub fn with_capacity(slabs: usize, max_mem: usize) -> Self {
        Self {
            table: SlabTable::new("rrset", slabs, max_mem),
            ids: IdAllocator::new(),
        }
    }

    pub fn lookup(
        &self,
        name: &DomainName,
        rtype: RecordType,
        class: RecordClass,
        flags: u32,
        now: u64,
        for_write: bool,
    ) -> Option<RrsetHandle> {
        let key = RrsetKey::new(name.clone(), rtype, class, flags);
        self.lookup_key(&key, now, for_write)
    }

    /// Misses when the entry is absent or `now` is past its TTL.
    pub fn lookup_key(&self, key: &RrsetKey, now: u64, for_write: bool) -> Option<RrsetHandle> {
        let hash = SlabTable::<RrsetKey, RrsetSlot>::hash_key(key);
        match self.table.lookup(hash, key, for_write) {
            Some(guard) if now <= guard.value().data.ttl => {
                self.table.metrics().record_hit();
                Some(RrsetHandle { guard })
            }
            _ => {
                self.table.metrics().record_miss();
                None
            }
        }
    }

    /// Offers a candidate RRset (TTLs absolute) to the cache.
    ///
    /// Returns the outcome and a reference to whichever copy is now
    /// cached; callers must use that reference, not their candidate.
    pub fn update(&self, candidate: PackedRrset, now: u64) -> (UpdateOutcome, RrsetRef) {
        let PackedRrset { key, data } = candidate;
        let hash = SlabTable::<RrsetKey, RrsetSlot>::hash_key(&key);
        let is_ns = key.rtype == RecordType::NS;
        let renews = key.rtype.renews_identity_on_change();
        let fresh_id = self.ids.next();
        let mut id = fresh_id;
        let mut equal = false;

        let slot = RrsetSlot { id: fresh_id, data };
        let (entry, upsert) = self.table.upsert(hash, key, slot, |cached, mut candidate| {
            equal = candidate.data.rdata_equal(&cached.data);
            let replace = need_to_update(&mut candidate.data, &cached.data, now, equal, is_ns);
            if replace {
                cached.data = candidate.data;
                if renews && !equal {
                    cached.id = fresh_id;
                }
            }
            id = cached.id;
            replace
        });
        let rref = RrsetRef { entry, id };

        let outcome = match upsert {
            Upsert::Inserted => UpdateOutcome::Inserted,
            Upsert::Replaced if equal => UpdateOutcome::InsertedEquivalent,
            Upsert::Replaced => {
                if renews && id == fresh_id {
                    debug!(name = %rref.key().name, rtype = %rref.key().rtype, "RRset identity renewed");
                }
                UpdateOutcome::Inserted
            }
            Upsert::Kept => {
                self.table
                    .metrics()
                    .rejected_updates
                    .fetch_add(1, AtomicOrdering::Relaxed);
                trace!(name = %rref.key().name, rtype = %rref.key().rtype, equal, "Cached RRset kept");
                UpdateOutcome::Rejected
            }
        };
        (outcome, rref)
    }

    /// Read-locks every distinct referenced entry in ascending entry
    /// order, checking identifier and TTL as it goes. On any mismatch all
    /// locks taken so far are released and `None` is returned.
    pub fn array_lock(&self, refs: &[RrsetRef], now: u64) -> Option<LockedRrsets> {
        let mut order: SmallVec<[&RrsetRef; 16]> = refs.iter().collect();
        order.sort_by_key(|r| (r.addr(), r.id));

        let mut entries: SmallVec<[LockedEntry; 8]> = SmallVec::with_capacity(order.len());
        for rref in order {
            if entries
                .last()
                .is_some_and(|last: &LockedEntry| last.rref.same_entry(rref))
            {
                continue;
            }
            let guard = rref.entry.read();
            if guard.id != rref.id || now > guard.data.ttl {
                self.table.metrics().record_miss();
                return None;
            }
            entries.push(LockedEntry {
                rref: rref.clone(),
                guard,
            });
        }
        Some(LockedRrsets { entries })
    }

    /// Promotes an entry in its shard's LRU list if the reference is
    /// still current.
    pub fn touch(&self, rref: &RrsetRef) -> bool {
        let id = rref.id;
        self.table.touch(&rref.entry, |slot| slot.id == id && id != 0)
    }

    pub fn touch_all(&self, unlocked: UnlockedRrsets) {
        for rref in unlocked.refs.iter() {
            self.touch(rref);
        }
    }

    /// Copies a validation result into the cached copy of `rrset` when the
    /// cached data is unchanged and less secure. `rrset` TTLs are relative.
    pub fn update_sec_status(&self, rrset: &PackedRrset, now: u64) {
        let Some(mut handle) = self.raw_lookup(&rrset.key, true) else {
            return;
        };
        let Some(cached) = handle.data_mut() else {
            return;
        };
        let update = &rrset.data;
        if !update.rdata_equal(cached) || update.security <= cached.security {
            return;
        }
        if update.trust > cached.trust {
            cached.trust = update.trust;
        }
        cached.security = update.security;
        if rrset.key.rtype != RecordType::NS
            || update.ttl + now < cached.ttl
            || cached.ttl < now
            || update.security == SecurityStatus::Bogus
        {
            cached.ttl = update.ttl + now;
            for (cached_ttl, ttl) in cached.rr_ttl.iter_mut().zip(update.rr_ttl.iter()) {
                *cached_ttl = ttl + now;
            }
        }
    }

    /// Adopts the cached security status into `rrset` when the cached copy
    /// is current, equal and more secure. `rrset` TTLs are relative.
    pub fn check_sec_status(&self, rrset: &mut PackedRrset, now: u64) {
        let Some(handle) = self.raw_lookup(&rrset.key, false) else {
            return;
        };
        let cached = handle.data();
        let update = &mut rrset.data;
        if now > cached.ttl || !update.rdata_equal(cached) {
            return;
        }
        if cached.security > update.security {
            update.security = cached.security;
            if cached.security == SecurityStatus::Bogus {
                update.ttl = cached.ttl - now;
                for (ttl, cached_ttl) in update.rr_ttl.iter_mut().zip(cached.rr_ttl.iter()) {
                    *ttl = cached_ttl.saturating_sub(now);
                }
            }
            if cached.trust > update.trust {
                update.trust = cached.trust;
            }
        }
    }

    pub fn remove(&self, name: &DomainName, rtype: RecordType, class: RecordClass, flags: u32) -> bool {
        let key = RrsetKey::new(name.clone(), rtype, class, flags);
        let hash = SlabTable::<RrsetKey, RrsetSlot>::hash_key(&key);
        self.table.remove(hash, &key)
    }

    fn raw_lookup(&self, key: &RrsetKey, for_write: bool) -> Option<RrsetHandle> {
        let hash = SlabTable::<RrsetKey, RrsetSlot>::hash_key(key);
        self.table
            .lookup(hash, key, for_write)
            .map(|guard| RrsetHandle { guard })
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
