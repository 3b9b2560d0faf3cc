//! Byte-slice cache specialization.
//!
//! [`BytesCache`] keys and values are byte sequences copied into
//! node-owned buffers at insert time. Buffers are cleared and refilled in
//! place when a slot is recycled, so a warm cache reuses its allocations
//! instead of churning the heap for every write. The rest of the contract
//! — sharding, LRU recycling, TTL, sliding expiration, stats and
//! single-flight loading — matches [`Cache`](crate::cache::Cache).
//!
//! Reads return owned copies; [`BytesCache::get_with`] offers a zero-copy
//! view executed under the shard lock for callers that only need to
//! inspect the value.
//!
//! # Example
//!
//! ```
//! use lrukit::BytesCache;
//!
//! let cache = BytesCache::new(1000);
//! cache.set(b"user:1", b"alice", None);
//! assert_eq!(cache.get(b"user:1"), Some(b"alice".to_vec()));
//! assert_eq!(cache.get_with(b"user:1", |v| v.len()), Some(5));
//! ```

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::builder::{per_shard_capacity, shard_count};
use crate::cache::{CacheStats, CancelToken};
use crate::ds::coarse_clock::{self, ttl_ticks};
use crate::ds::{RhTable, SlabList};
use crate::error::CacheError;
use crate::singleflight::Group;

/// Loader for [`BytesCache::get_or_load`].
pub type BytesLoaderFn = Arc<
    dyn Fn(
            &CancelToken,
            &[u8],
        ) -> Result<(Vec<u8>, Option<Duration>), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

fn hash_bytes(seed: u64, key: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish() as u32
}

/// Node payload: owned key/value buffers plus expiry bookkeeping.
///
/// `used` distinguishes a never-occupied slot from one holding an entry
/// with an empty key or value.
#[derive(Default)]
struct BytesEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    expires: u32,
    ttl: u32,
    used: bool,
}

struct BytesShardInner {
    table: RhTable,
    list: SlabList<BytesEntry>,
    seed: u64,
    sliding: bool,
    stats_get: u64,
    stats_set: u64,
    stats_miss: u64,
}

#[repr(align(128))]
struct BytesShard {
    inner: Mutex<BytesShardInner>,
}

impl BytesShard {
    fn new(capacity: u32, seed: u64, sliding: bool) -> Self {
        Self {
            inner: Mutex::new(BytesShardInner {
                table: RhTable::new(capacity),
                list: SlabList::new(capacity),
                seed,
                sliding,
                stats_get: 0,
                stats_set: 0,
                stats_miss: 0,
            }),
        }
    }

    fn get_with<R>(&self, hash: u32, key: &[u8], f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats_get += 1;

        let found = {
            let list = &inner.list;
            inner.table.get(hash, |i| list.node(i).key == key)
        };
        let Some(i) = found else {
            inner.stats_miss += 1;
            return None;
        };

        let expires = inner.list.node(i).expires;
        if expires != 0 {
            let now = coarse_clock::now();
            if now >= expires {
                // Clearing keeps the buffer's capacity for the next tenant.
                inner.list.node_mut(i).value.clear();
                inner.list.move_to_back(i);
                {
                    let BytesShardInner { table, list, .. } = inner;
                    let list = &*list;
                    table.delete(hash, |j| list.node(j).key == key);
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
        Some(f(&inner.list.node(i).value))
    }

    fn peek(&self, hash: u32, key: &[u8]) -> Option<(Vec<u8>, u32)> {
        let inner = self.inner.lock();
        let list = &inner.list;
        let i = inner.table.get(hash, |j| list.node(j).key == key)?;
        let entry = inner.list.node(i);
        Some((entry.value.clone(), entry.expires))
    }

    fn set(&self, hash: u32, key: &[u8], value: &[u8], ttl: Option<Duration>) -> (Option<Vec<u8>>, bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats_set += 1;

        let existing = {
            let list = &inner.list;
            inner.table.get(hash, |i| list.node(i).key == key)
        };
        if let Some(i) = existing {
            inner.list.move_to_front(i);
            let entry = inner.list.node_mut(i);
            let prev = mem::take(&mut entry.value);
            entry.value.extend_from_slice(value);
            if let Some(secs) = ttl_ticks(ttl) {
                entry.ttl = secs;
                entry.expires = coarse_clock::now() + secs;
            }
            return (Some(prev), true);
        }

        (inner.recycle_insert(hash, key, value, ttl), false)
    }

    fn set_if_absent(
        &self,
        hash: u32,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> (Option<Vec<u8>>, bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let existing = {
            let list = &inner.list;
            inner.table.get(hash, |i| list.node(i).key == key)
        };
        if let Some(i) = existing {
            let entry = inner.list.node(i);
            if entry.expires == 0 || coarse_clock::now() < entry.expires {
                return (Some(entry.value.clone()), false);
            }
            inner.stats_set += 1;
            let entry = inner.list.node_mut(i);
            let prev = mem::take(&mut entry.value);
            entry.value.extend_from_slice(value);
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
            return (Some(prev), true);
        }

        inner.stats_set += 1;
        (inner.recycle_insert(hash, key, value, ttl), false)
    }

    fn delete(&self, hash: u32, key: &[u8]) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let found = {
            let list = &inner.list;
            inner.table.get(hash, |i| list.node(i).key == key)
        };
        let i = found?;

        let value = mem::take(&mut inner.list.node_mut(i).value);
        inner.list.move_to_back(i);
        {
            let BytesShardInner { table, list, .. } = inner;
            let list = &*list;
            table.delete(hash, |j| list.node(j).key == key);
        }
        Some(value)
    }

    fn append_keys(&self, dst: &mut Vec<Vec<u8>>, now: u32) {
        let inner = self.inner.lock();
        for i in inner.table.indices() {
            let entry = inner.list.node(i);
            if entry.expires == 0 || now <= entry.expires {
                dst.push(entry.key.clone());
            }
        }
    }

    fn len(&self) -> u32 {
        self.inner.lock().table.len()
    }

    fn collect_stats(&self, stats: &mut CacheStats) {
        let inner = self.inner.lock();
        stats.entries += u64::from(inner.table.len());
        stats.get_calls += inner.stats_get;
        stats.set_calls += inner.stats_set;
        stats.misses += inner.stats_miss;
    }

    #[cfg(test)]
    fn force_expire(&self, hash: u32, key: &[u8]) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let found = {
            let list = &inner.list;
            inner.table.get(hash, |i| list.node(i).key == key)
        };
        if let Some(i) = found {
            let entry = inner.list.node_mut(i);
            entry.ttl = 1;
            entry.expires = 1;
        }
    }
}

impl BytesShardInner {
    fn recycle_insert(
        &mut self,
        hash: u32,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Option<Vec<u8>> {
        let i = self.list.back();

        let victim = self.list.node(i);
        let victim_hash = victim.used.then(|| hash_bytes(self.seed, &victim.key));
        if let Some(victim_hash) = victim_hash {
            self.table.delete_index(victim_hash, i);
        }

        {
            let BytesShardInner { table, list, .. } = self;
            let list = &*list;
            table.set(hash, i, |j| list.node(j).key == key);
        }

        let entry = self.list.node_mut(i);
        let prev = entry.used.then(|| mem::take(&mut entry.value));
        entry.key.clear();
        entry.key.extend_from_slice(key);
        entry.value.clear();
        entry.value.extend_from_slice(value);
        entry.used = true;
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
        self.list.move_to_front(i);
        prev
    }
}

/// Sharded LRU cache for binary keys and values; see the module docs.
pub struct BytesCache {
    shards: Box<[BytesShard]>,
    mask: u32,
    seed: u64,
    loader: Option<BytesLoaderFn>,
    group: Group<Vec<u8>, Vec<u8>>,
}

impl BytesCache {
    /// Creates a bytes cache with default options.
    pub fn new(capacity: usize) -> Self {
        BytesCacheBuilder::new(capacity).build()
    }

    #[inline]
    fn shard(&self, hash: u32) -> &BytesShard {
        &self.shards[(hash & self.mask) as usize]
    }

    /// Returns a copy of the value for `key`, promoting the entry.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get_with(key, |v| v.to_vec())
    }

    /// Runs `f` over the value for `key` without copying it out. The
    /// closure executes under the shard lock, so keep it short.
    pub fn get_with<R>(&self, key: &[u8], f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let hash = hash_bytes(self.seed, key);
        self.shard(hash).get_with(hash, key, f)
    }

    /// Returns the value and its absolute expiry without touching recency
    /// or stats.
    pub fn peek(&self, key: &[u8]) -> Option<(Vec<u8>, Option<SystemTime>)> {
        let hash = hash_bytes(self.seed, key);
        let (value, expires) = self.shard(hash).peek(hash, key)?;
        let wall = (expires != 0).then(|| coarse_clock::wall_time(expires));
        Some((value, wall))
    }

    /// Copies `key → value` into the cache, evicting the shard's LRU entry
    /// on overflow. Returns the previous value and whether the key was
    /// already present.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> (Option<Vec<u8>>, bool) {
        let hash = hash_bytes(self.seed, key);
        self.shard(hash).set(hash, key, value, ttl)
    }

    /// Like [`set`](Self::set), but a present, non-expired entry is left
    /// untouched and returned.
    pub fn set_if_absent(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> (Option<Vec<u8>>, bool) {
        let hash = hash_bytes(self.seed, key);
        self.shard(hash).set_if_absent(hash, key, value, ttl)
    }

    /// Removes `key`, returning its value.
    pub fn delete(&self, key: &[u8]) -> Option<Vec<u8>> {
        let hash = hash_bytes(self.seed, key);
        self.shard(hash).delete(hash, key)
    }

    /// Number of live entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len() as usize).sum()
    }

    /// Returns `true` if no shard holds an entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a snapshot of all unexpired keys to `keys` and returns it.
    /// Order is unspecified.
    pub fn append_keys(&self, mut keys: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let now = coarse_clock::now();
        for shard in self.shards.iter() {
            shard.append_keys(&mut keys, now);
        }
        keys
    }

    /// Aggregates counters across shards, locking each one briefly.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for shard in self.shards.iter() {
            shard.collect_stats(&mut stats);
        }
        stats
    }

    /// Returns the cached value or computes it through the loader,
    /// deduplicating concurrent misses for the same key. Semantics match
    /// [`Cache::get_or_load`](crate::cache::Cache::get_or_load).
    pub fn get_or_load(
        &self,
        token: &CancelToken,
        key: &[u8],
        loader: Option<&BytesLoaderFn>,
    ) -> Result<Vec<u8>, CacheError> {
        let hash = hash_bytes(self.seed, key);
        if let Some(value) = self.shard(hash).get_with(hash, key, |v| v.to_vec()) {
            return Ok(value);
        }

        let loader = loader.or(self.loader.as_ref()).ok_or(CacheError::LoaderMissing)?;

        let (result, _shared) = self.group.work(&key.to_vec(), || {
            if token.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            match loader(token, key) {
                Ok((value, ttl)) => {
                    self.shard(hash).set(hash, key, &value, ttl);
                    Ok(value)
                }
                Err(err) => {
                    if token.is_cancelled() {
                        Err(CacheError::Cancelled)
                    } else {
                        Err(CacheError::LoaderFailed(Arc::from(err)))
                    }
                }
            }
        });
        result
    }
}

/// Builder for [`BytesCache`] instances.
pub struct BytesCacheBuilder {
    capacity: usize,
    shards: Option<usize>,
    sliding: bool,
    loader: Option<BytesLoaderFn>,
}

impl BytesCacheBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shards: None,
            sliding: false,
            loader: None,
        }
    }

    /// Overrides the shard count; rounded up to a power of two and clamped
    /// to `[1, 512]`.
    pub fn shards(mut self, count: usize) -> Self {
        self.shards = Some(count);
        self
    }

    /// Enables sliding expiration.
    pub fn sliding(mut self, sliding: bool) -> Self {
        self.sliding = sliding;
        self
    }

    /// Installs a default loader for [`BytesCache::get_or_load`].
    pub fn loader(mut self, f: BytesLoaderFn) -> Self {
        self.loader = Some(f);
        self
    }

    pub fn build(self) -> BytesCache {
        coarse_clock::ensure_ticker();

        let shard_count = shard_count(self.shards);
        let per_shard = per_shard_capacity(self.capacity, shard_count);
        let seed = rand::random::<u64>();

        let shards: Vec<BytesShard> = (0..shard_count)
            .map(|_| BytesShard::new(per_shard, seed, self.sliding))
            .collect();
        log::debug!(
            "bytes cache built: capacity={} shards={shard_count} per_shard={per_shard}",
            self.capacity
        );

        BytesCache {
            shards: shards.into_boxed_slice(),
            mask: shard_count as u32 - 1,
            seed,
            loader: self.loader,
            group: Group::new(),
        }
    }
}
