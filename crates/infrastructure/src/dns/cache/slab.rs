//! Sharded LRU table shared by the resolver caches.
//!
//! Each shard is a mutex-protected LRU index of entries; each entry has its
//! own read/write lock around its value. Locks are always taken shard
//! first, entry second: every path from the table into an entry goes
//! through a held shard guard. Callers holding an entry guard must drop it
//! before calling back into the table.

use super::metrics::CacheMetrics;
use lru::LruCache;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, MutexGuard, RawRwLock, RwLock};
use rustc_hash::{FxBuildHasher, FxHasher};
use std::hash::{Hash, Hasher};
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{debug, info};

pub trait SlabKey: Hash + Eq + Clone + Send + Sync {
    fn mem_size(&self) -> usize;
}

pub trait SlabValue: Send + Sync {
    fn mem_size(&self) -> usize;

    /// Called under the entry write lock when the entry leaves the table.
    fn mark_deleted(&mut self) {}

    /// Called under the entry write lock when an insert finds the key
    /// already present.
    fn replace_with(&mut self, newer: Self)
    where
        Self: Sized,
    {
        *self = newer;
    }
}

pub struct SlabEntry<K, V> {
    key: K,
    hash: u64,
    accounted: AtomicUsize,
    lock: Arc<RwLock<V>>,
}

impl<K, V> SlabEntry<K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Locks the value for reading without going through the table.
    pub fn read(&self) -> ArcRwLockReadGuard<RawRwLock, V> {
        self.lock.read_arc()
    }

    /// Locks the value for writing without going through the table.
    pub fn write(&self) -> ArcRwLockWriteGuard<RawRwLock, V> {
        self.lock.write_arc()
    }

    /// True when no lock on the value is held by anyone.
    pub fn is_unlocked(&self) -> bool {
        !self.lock.is_locked()
    }
}

pub type EntryRef<K, V> = Arc<SlabEntry<K, V>>;

/// What [`SlabTable::upsert`] did with the offered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Kept,
}

/// A locked entry obtained from the table.
pub enum EntryGuard<K, V> {
    Read(EntryRef<K, V>, ArcRwLockReadGuard<RawRwLock, V>),
    Write(EntryRef<K, V>, ArcRwLockWriteGuard<RawRwLock, V>),
}

impl<K, V> EntryGuard<K, V> {
    pub fn entry(&self) -> &EntryRef<K, V> {
        match self {
            Self::Read(entry, _) | Self::Write(entry, _) => entry,
        }
    }

    pub fn value(&self) -> &V {
        match self {
            Self::Read(_, guard) => guard,
            Self::Write(_, guard) => guard,
        }
    }

    /// `None` for read guards.
    pub fn value_mut(&mut self) -> Option<&mut V> {
        match self {
            Self::Read(..) => None,
            Self::Write(_, guard) => Some(&mut **guard),
        }
    }
}

struct Shard<K, V> {
    lru: LruCache<K, EntryRef<K, V>, FxBuildHasher>,
    space_used: usize,
    space_max: usize,
}

/// Proof that a shard's table lock is held.
struct ShardLock<'a, K, V> {
    shard: MutexGuard<'a, Shard<K, V>>,
}

impl<K: SlabKey, V: SlabValue> ShardLock<'_, K, V> {
    fn lock_entry(&self, entry: &EntryRef<K, V>, for_write: bool) -> EntryGuard<K, V> {
        if for_write {
            EntryGuard::Write(Arc::clone(entry), entry.lock.write_arc())
        } else {
            EntryGuard::Read(Arc::clone(entry), entry.lock.read_arc())
        }
    }

    fn evict_until_fits(&mut self, metrics: &CacheMetrics) {
        while self.shard.space_used > self.shard.space_max && self.shard.lru.len() > 1 {
            let Some((_, victim)) = self.shard.lru.pop_lru() else {
                break;
            };
            let mut value = victim.lock.write();
            value.mark_deleted();
            drop(value);
            self.shard.space_used = self
                .shard
                .space_used
                .saturating_sub(victim.accounted.load(AtomicOrdering::Relaxed));
            metrics.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }
}

pub struct SlabTable<K, V> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    mask: usize,
    name: &'static str,
    metrics: CacheMetrics,
}

pub(crate) const ENTRY_OVERHEAD: usize = size_of::<usize>() * 8;

fn entry_size<K: SlabKey, V: SlabValue>(key: &K, value: &V) -> usize {
    key.mem_size() + value.mem_size() + ENTRY_OVERHEAD
}

impl<K: SlabKey, V: SlabValue> SlabTable<K, V> {
    /// `slabs` must be a power of two; the memory budget is split evenly.
    pub fn new(name: &'static str, slabs: usize, max_mem: usize) -> Self {
        let slabs = slabs.max(1).next_power_of_two();
        let per_shard = (max_mem / slabs).max(1);
        let shards = (0..slabs)
            .map(|_| {
                Mutex::new(Shard {
                    lru: LruCache::unbounded_with_hasher(FxBuildHasher),
                    space_used: 0,
                    space_max: per_shard,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        info!(
            cache = name,
            slabs = slabs,
            max_mem = max_mem,
            "Initializing slab table"
        );

        Self {
            shards,
            mask: slabs - 1,
            name,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn hash_key(key: &K) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn lock_shard(&self, hash: u64) -> ShardLock<'_, K, V> {
        let index = ((hash >> 32) as usize) & self.mask;
        ShardLock {
            shard: self.shards[index].lock(),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Finds `key`, marks it most recently used and returns it locked.
    pub fn lookup(&self, hash: u64, key: &K, for_write: bool) -> Option<EntryGuard<K, V>> {
        let mut table = self.lock_shard(hash);
        let entry = Arc::clone(table.shard.lru.get(key)?);
        Some(table.lock_entry(&entry, for_write))
    }

    /// Inserts a value, or replaces the value of an existing entry in
    /// place. Returns the entry and whether it already existed.
    pub fn insert(&self, hash: u64, key: K, value: V) -> (EntryRef<K, V>, bool) {
        let (entry, outcome) = self.upsert(hash, key, value, |current, newer| {
            current.replace_with(newer);
            true
        });
        (entry, outcome != Upsert::Inserted)
    }

    /// Inserts `value` when `key` is absent. Otherwise `merge` gets the
    /// current value and the candidate and returns true if it changed the
    /// current value. `merge` runs with the shard lock and the entry write
    /// lock held, so no writer can slip in between its decision and the
    /// change.
    pub fn upsert<F>(&self, hash: u64, key: K, value: V, merge: F) -> (EntryRef<K, V>, Upsert)
    where
        F: FnOnce(&mut V, V) -> bool,
    {
        let mut table = self.lock_shard(hash);

        if let Some(existing) = table.shard.lru.get(&key).map(Arc::clone) {
            let mut current = existing.lock.write();
            if !merge(&mut current, value) {
                drop(current);
                return (existing, Upsert::Kept);
            }
            let new_size = entry_size(&existing.key, &*current);
            drop(current);
            let old_size = existing.accounted.swap(new_size, AtomicOrdering::Relaxed);
            table.shard.space_used = table.shard.space_used.saturating_sub(old_size) + new_size;
            table.evict_until_fits(&self.metrics);
            self.metrics.updates.fetch_add(1, AtomicOrdering::Relaxed);
            return (existing, Upsert::Replaced);
        }

        let size = entry_size(&key, &value);
        let entry = Arc::new(SlabEntry {
            key: key.clone(),
            hash,
            accounted: AtomicUsize::new(size),
            lock: Arc::new(RwLock::new(value)),
        });
        table.shard.lru.push(key, Arc::clone(&entry));
        table.shard.space_used += size;
        table.evict_until_fits(&self.metrics);
        self.metrics.insertions.fetch_add(1, AtomicOrdering::Relaxed);
        (entry, Upsert::Inserted)
    }

    pub fn remove(&self, hash: u64, key: &K) -> bool {
        let mut table = self.lock_shard(hash);
        let Some(entry) = table.shard.lru.pop(key) else {
            return false;
        };
        let mut value = entry.lock.write();
        value.mark_deleted();
        drop(value);
        table.shard.space_used = table
            .shard
            .space_used
            .saturating_sub(entry.accounted.load(AtomicOrdering::Relaxed));
        self.metrics.removals.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(cache = self.name, "Removed cache entry");
        true
    }

    /// Marks an entry most recently used if it is still the live entry for
    /// its key and `is_live` accepts its value.
    pub fn touch(&self, entry: &EntryRef<K, V>, is_live: impl FnOnce(&V) -> bool) -> bool {
        let mut table = self.lock_shard(entry.hash);
        match table.shard.lru.peek(&entry.key) {
            Some(current) if Arc::ptr_eq(current, entry) => {}
            _ => return false,
        }
        let live = {
            let guard = table.lock_entry(entry, false);
            is_live(guard.value())
        };
        if live {
            table.shard.lru.promote(&entry.key);
        }
        live
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().lru.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mem_used(&self) -> usize {
        self.shards.iter().map(|s| s.lock().space_used).sum()
    }

    pub fn num_slabs(&self) -> usize {
        self.shards.len()
    }
}
