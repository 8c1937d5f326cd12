use std::{sync::Arc, time::Instant};

use ahash::{HashMap, HashSet};
use parking_lot::Mutex;
use pumice::vk;

use super::{backing::Bundle, BorrowKey};

/// Per-thread state of one native command pool.
#[derive(Clone, Debug)]
pub(crate) struct PoolEntry {
    pub(crate) pool: vk::CommandPool,
    pub(crate) available: HashSet<vk::CommandBuffer>,
    pub(crate) loaned: usize,
    pub(crate) last_used: Instant,
}

impl PoolEntry {
    pub(crate) fn from_bundle(bundle: Bundle) -> Self {
        Self {
            pool: bundle.pool,
            available: bundle.buffers,
            loaned: 0,
            last_used: Instant::now(),
        }
    }
    /// Hands the native pool back in bundle form. Buffers still on loan are not included, they
    /// stay allocated in the pool until it is destroyed.
    pub(crate) fn into_bundle(&self, key: &BorrowKey) -> Bundle {
        Bundle {
            key: key.pool,
            pool: self.pool,
            buffers: self.available.clone(),
        }
    }
}

pub(crate) enum Reserve {
    /// No entry exists for this key yet.
    Missing,
    /// A pooled buffer was taken.
    Taken {
        buffer: vk::CommandBuffer,
        pool: vk::CommandPool,
    },
    /// The entry had nothing available; a loan was recorded and the caller allocates a fresh
    /// buffer from `pool`, or cancels the reservation if that fails.
    Empty { pool: vk::CommandPool },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Returned {
    Returned,
    /// The entry is gone or now belongs to a different native pool.
    Stale,
    /// The entry has no outstanding loans.
    NotLoaned,
}

type EntryMap = HashMap<BorrowKey, Arc<PoolEntry>>;

/// Map from borrow key to pool entry.
///
/// The map itself is immutable; every mutation builds a new map from a snapshot and only
/// installs it if no other writer got there first, retrying otherwise. The lock is held just for
/// the pointer comparison and swap.
pub(crate) struct Registry {
    current: Mutex<Arc<EntryMap>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(Arc::new(EntryMap::default())),
        }
    }
    pub(crate) fn snapshot(&self) -> Arc<EntryMap> {
        self.current.lock().clone()
    }
    fn update<R>(&self, mut modify: impl FnMut(&EntryMap) -> (Option<EntryMap>, R)) -> R {
        loop {
            let snapshot = self.snapshot();
            let (next, result) = modify(&snapshot);
            let Some(next) = next else {
                return result;
            };

            let mut current = self.current.lock();
            if Arc::ptr_eq(&current, &snapshot) {
                *current = Arc::new(next);
                return result;
            }
        }
    }
    fn replace(map: &EntryMap, key: BorrowKey, entry: PoolEntry) -> EntryMap {
        let mut next = map.clone();
        next.insert(key, Arc::new(entry));
        next
    }
    pub(crate) fn get(&self, key: &BorrowKey) -> Option<Arc<PoolEntry>> {
        self.snapshot().get(key).cloned()
    }
    pub(crate) fn contains(&self, key: &BorrowKey) -> bool {
        self.snapshot().contains_key(key)
    }
    /// Returns false without modifying anything if the key already has an entry.
    pub(crate) fn insert(&self, key: BorrowKey, entry: PoolEntry) -> bool {
        self.update(|map| {
            if map.contains_key(&key) {
                (None, false)
            } else {
                (Some(Self::replace(map, key, entry.clone())), true)
            }
        })
    }
    pub(crate) fn reserve(&self, key: &BorrowKey, now: Instant) -> Reserve {
        self.update(|map| {
            let Some(entry) = map.get(key) else {
                return (None, Reserve::Missing);
            };

            let mut entry = PoolEntry::clone(entry);
            let reserved = match entry.available.iter().next().copied() {
                Some(buffer) => {
                    entry.available.remove(&buffer);
                    Reserve::Taken {
                        buffer,
                        pool: entry.pool,
                    }
                }
                None => Reserve::Empty { pool: entry.pool },
            };
            entry.loaned += 1;
            entry.last_used = now;

            (Some(Self::replace(map, *key, entry)), reserved)
        })
    }
    pub(crate) fn cancel_reservation(&self, key: &BorrowKey) {
        self.update(|map| match map.get(key) {
            Some(entry) if entry.loaned > 0 => {
                let mut entry = PoolEntry::clone(entry);
                entry.loaned -= 1;
                (Some(Self::replace(map, *key, entry)), ())
            }
            _ => (None, ()),
        })
    }
    pub(crate) fn give_back(
        &self,
        key: &BorrowKey,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
        now: Instant,
    ) -> Returned {
        self.update(|map| match map.get(key) {
            Some(entry) if entry.pool == pool => {
                if entry.loaned == 0 {
                    return (None, Returned::NotLoaned);
                }
                let mut entry = PoolEntry::clone(entry);
                entry.available.insert(buffer);
                entry.loaned -= 1;
                entry.last_used = now;
                (Some(Self::replace(map, *key, entry)), Returned::Returned)
            }
            _ => (None, Returned::Stale),
        })
    }
    /// Removes every entry matching `predicate` in a single swap of the whole map.
    pub(crate) fn remove_where(
        &self,
        mut predicate: impl FnMut(&BorrowKey, &PoolEntry) -> bool,
    ) -> Vec<(BorrowKey, Arc<PoolEntry>)> {
        self.update(|map| {
            let mut kept = EntryMap::default();
            let mut removed = Vec::new();
            for (key, entry) in map {
                if predicate(key, entry) {
                    removed.push((*key, entry.clone()));
                } else {
                    kept.insert(*key, entry.clone());
                }
            }

            if removed.is_empty() {
                (None, removed)
            } else {
                (Some(kept), removed)
            }
        })
    }
    pub(crate) fn drain(&self) -> Vec<(BorrowKey, Arc<PoolEntry>)> {
        self.remove_where(|_, _| true)
    }
}
