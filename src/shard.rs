//! One LRU partition: node slab + Robin Hood table + stats behind a mutex.
//!
//! Every per-key operation happens here, inside a short critical section
//! that never runs user callbacks other than the stop hook. The struct is
//! aligned to 128 bytes so neighboring shards in the shard slice never
//! share a cache line; the two heap slabs are the only out-of-line state.
//!
//! Entry lifecycle: nodes are created once at construction and recycled
//! forever after. `sentinel.prev` is always the victim slot — a free node
//! while the shard fills up, the least recently used entry afterwards.
//! Deleting or expiring an entry clears its value and parks the node at
//! the back of the ring for reuse.

use parking_lot::Mutex;
use std::hash::Hash;
use std::time::Duration;

use crate::cache::{CacheStats, StopFn};
use crate::ds::coarse_clock::{self, ttl_ticks};
use crate::ds::{RhTable, SlabList};
use crate::hasher::KeyHasher;

/// Node payload: key/value plus expiry bookkeeping.
///
/// `expires` is an absolute clock tick (0 = never) and `ttl` the original
/// lifetime in seconds, kept for sliding refresh. Free slots hold `None`
/// in both key and value.
pub(crate) struct Entry<K, V> {
    key: Option<K>,
    value: Option<V>,
    expires: u32,
    ttl: u32,
}

impl<K, V> Default for Entry<K, V> {
    fn default() -> Self {
        Self {
            key: None,
            value: None,
            expires: 0,
            ttl: 0,
        }
    }
}

pub(crate) struct ShardInner<K, V> {
    table: RhTable,
    list: SlabList<Entry<K, V>>,
    hasher: KeyHasher<K>,
    sliding: bool,
    stop: Option<StopFn<V>>,
    stats_get: u64,
    stats_set: u64,
    stats_miss: u64,
}

/// A cache partition with exclusive ownership of its slabs.
#[repr(align(128))]
pub(crate) struct Shard<K, V> {
    inner: Mutex<ShardInner<K, V>>,
}

impl<K, V> Shard<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(
        capacity: u32,
        hasher: KeyHasher<K>,
        sliding: bool,
        stop: Option<StopFn<V>>,
    ) -> Self {
        Self {
            inner: Mutex::new(ShardInner {
                table: RhTable::new(capacity),
                list: SlabList::new(capacity),
                hasher,
                sliding,
                stop,
                stats_get: 0,
                stats_set: 0,
                stats_miss: 0,
            }),
        }
    }

    /// Lookup with recency promotion and expiry enforcement.
    pub(crate) fn get(&self, hash: u32, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats_get += 1;

        let found = {
            let list = &inner.list;
            inner
                .table
                .get(hash, |i| list.node(i).key.as_ref() == Some(key))
        };
        let Some(i) = found else {
            inner.stats_miss += 1;
            return None;
        };

        let expires = inner.list.node(i).expires;
        if expires != 0 {
            let now = coarse_clock::now();
            if now >= expires {
                // Expired: release the value, park the node for reuse and
                // drop the table entry. Counts as a miss.
                let value = inner.list.node_mut(i).value.take();
                if let (Some(stop), Some(v)) = (inner.stop.as_ref(), value.as_ref()) {
                    stop(v);
                }
                inner.list.move_to_back(i);
                {
                    let ShardInner { table, list, .. } = inner;
                    let list = &*list;
                    table.delete(hash, |j| list.node(j).key.as_ref() == Some(key));
                }
                inner.stats_miss += 1;
                return None;
            }
            if inner.sliding {
                let entry = inner.list.node_mut(i);
                entry.expires = now + entry.ttl;
            }
        }

        inner.list.move_to_front(i);
        inner.list.node(i).value.clone()
    }

    /// Lookup without touching recency, expiry, or stats.
    ///
    /// Returns the value and its absolute expiry tick (0 = never), even
    /// when the entry is already past due.
    pub(crate) fn peek(&self, hash: u32, key: &K) -> Option<(V, u32)> {
        let inner = self.inner.lock();
        let list = &inner.list;
        let i = inner
            .table
            .get(hash, |j| list.node(j).key.as_ref() == Some(key))?;
        let entry = inner.list.node(i);
        entry.value.clone().map(|v| (v, entry.expires))
    }

    /// Insert or replace; returns the previous (or evicted) value and
    /// whether the key was already present.
    pub(crate) fn set(
        &self,
        hash: u32,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> (Option<V>, bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats_set += 1;

        let existing = {
            let list = &inner.list;
            inner
                .table
                .get(hash, |i| list.node(i).key.as_ref() == Some(&key))
        };
        if let Some(i) = existing {
            inner.list.move_to_front(i);
            let entry = inner.list.node_mut(i);
            let prev = entry.value.replace(value);
            // No TTL argument leaves the entry's existing expiry alone.
            if let Some(secs) = ttl_ticks(ttl) {
                entry.ttl = secs;
                entry.expires = coarse_clock::now() + secs;
            }
            return (prev, true);
        }

        (inner.recycle_insert(hash, key, value, ttl), false)
    }

    /// Insert only when the key is absent or its entry has expired; a live
    /// entry is returned untouched.
    pub(crate) fn set_if_absent(
        &self,
        hash: u32,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> (Option<V>, bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let existing = {
            let list = &inner.list;
            inner
                .table
                .get(hash, |i| list.node(i).key.as_ref() == Some(&key))
        };
        if let Some(i) = existing {
            let entry = inner.list.node(i);
            let prev = entry.value.clone();
            if entry.expires == 0 || coarse_clock::now() < entry.expires {
                return (prev, false);
            }
            // Expired in place: rewrite value and expiry without touching
            // recency or the table.
            inner.stats_set += 1;
            let entry = inner.list.node_mut(i);
            entry.value = Some(value);
            match ttl_ticks(ttl) {
                Some(secs) => {
                    entry.ttl = secs;
                    entry.expires = coarse_clock::now() + secs;
                }
                None => {
                    entry.ttl = 0;
                    entry.expires = 0;
                }
            }
            return (prev, true);
        }

        inner.stats_set += 1;
        (inner.recycle_insert(hash, key, value, ttl), false)
    }

    /// Removes the key, returning its value after running the stop hook.
    pub(crate) fn delete(&self, hash: u32, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let found = {
            let list = &inner.list;
            inner
                .table
                .get(hash, |i| list.node(i).key.as_ref() == Some(key))
        };
        let i = found?;

        let value = inner.list.node_mut(i).value.take();
        if let (Some(stop), Some(v)) = (inner.stop.as_ref(), value.as_ref()) {
            stop(v);
        }
        inner.list.move_to_back(i);
        {
            let ShardInner { table, list, .. } = inner;
            let list = &*list;
            table.delete(hash, |j| list.node(j).key.as_ref() == Some(key));
        }
        value
    }

    /// Appends every key that is not past due at `now`. Order is
    /// unspecified (table order).
    pub(crate) fn append_keys(&self, dst: &mut Vec<K>, now: u32) {
        let inner = self.inner.lock();
        for i in inner.table.indices() {
            let entry = inner.list.node(i);
            if entry.expires == 0 || now <= entry.expires {
                if let Some(key) = entry.key.as_ref() {
                    dst.push(key.clone());
                }
            }
        }
    }

    pub(crate) fn len(&self) -> u32 {
        self.inner.lock().table.len()
    }

    pub(crate) fn collect_stats(&self, stats: &mut CacheStats) {
        let inner = self.inner.lock();
        stats.entries += u64::from(inner.table.len());
        stats.get_calls += inner.stats_get;
        stats.set_calls += inner.stats_set;
        stats.misses += inner.stats_miss;
    }

    /// Backdates an entry's expiry so expiry paths are testable without
    /// waiting on the wall clock.
    #[cfg(test)]
    pub(crate) fn force_expire(&self, hash: u32, key: &K) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let found = {
            let list = &inner.list;
            inner
                .table
                .get(hash, |i| list.node(i).key.as_ref() == Some(key))
        };
        if let Some(i) = found {
            let entry = inner.list.node_mut(i);
            entry.ttl = 1;
            entry.expires = 1;
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn debug_validate_invariants(&self) {
        let inner = self.inner.lock();
        inner.list.debug_validate_invariants();
        inner.table.debug_validate_invariants();

        // Every table entry references a keyed node, and the used region
        // is exactly the first `len` slots walking from the MRU end.
        let len = inner.table.len() as usize;
        let used: Vec<u32> = inner.list.iter_front().take(len).collect();
        for i in inner.table.indices() {
            assert!(
                inner.list.node(i).key.is_some(),
                "table references keyless slot {i}"
            );
            assert!(used.contains(&i), "slot {i} outside the used region");
        }
        assert!(len as u32 <= inner.list.capacity(), "table overfilled");
    }
}

impl<K, V> ShardInner<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Takes over the victim slot for a fresh key. Returns the value the
    /// victim held, which doubles as the eviction notice.
    fn recycle_insert(&mut self, hash: u32, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        let i = self.list.back();

        let victim_hash = {
            let entry = self.list.node(i);
            entry.key.as_ref().map(|k| self.hasher.hash32(k))
        };
        if let Some(victim_hash) = victim_hash {
            self.table.delete_index(victim_hash, i);
        }

        {
            let ShardInner { table, list, .. } = self;
            let list = &*list;
            table.set(hash, i, |j| list.node(j).key.as_ref() == Some(&key));
        }

        let entry = self.list.node_mut(i);
        let prev = entry.value.replace(value);
        entry.key = Some(key);
        match ttl_ticks(ttl) {
            Some(secs) => {
                entry.ttl = secs;
                entry.expires = coarse_clock::now() + secs;
            }
            None => {
                // The recycled node may carry the victim's expiry; a fresh
                // untimed entry must never inherit it.
                entry.ttl = 0;
                entry.expires = 0;
            }
        }
        self.list.move_to_front(i);
        prev
    }
}
