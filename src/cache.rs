//! Sharded cache front-end.
//!
//! A [`Cache`] owns a power-of-two slice of shards and dispatches every
//! operation to exactly one of them by the low bits of the key's hash.
//! There is no global lock: one mutex per shard, held only for the short
//! table/list critical section, and the coarse clock is the only shared
//! mutable state. The loading path (`get_or_load`) coordinates concurrent
//! misses through a single-flight group so each missing key is computed at
//! most once at a time.
//!
//! # Example
//!
//! ```
//! use lrukit::Cache;
//!
//! let cache: Cache<u64, String> = Cache::new(1000);
//!
//! cache.set(1, "one".to_string(), None);
//! assert_eq!(cache.get(&1), Some("one".to_string()));
//! assert_eq!(cache.get(&2), None);
//! ```

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::ds::coarse_clock;
use crate::error::CacheError;
use crate::hasher::KeyHasher;
use crate::shard::Shard;
use crate::singleflight::Group;

/// Counter snapshot aggregated across all shards.
///
/// `get_calls` always equals hits plus `misses`; `set_calls` counts
/// successful writes (inserts, replacements, and expired-entry rewrites).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub get_calls: u64,
    pub set_calls: u64,
    pub misses: u64,
}

/// Cooperative cancellation for loader invocations.
///
/// Cancelling affects only the loader: shard operations never block, and a
/// cancelled caller waiting on an in-flight single-flight result still
/// observes the shared outcome.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Fallible value producer for [`Cache::get_or_load`]: returns the value
/// and the TTL it should be cached with.
pub type LoaderFn<K, V> = Arc<
    dyn Fn(&CancelToken, &K) -> Result<(V, Option<Duration>), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

/// Release hook invoked on an entry's value when it expires during a
/// lookup or is deleted. Configured once at build time and cached on every
/// shard.
pub type StopFn<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Sharded LRU cache with optional TTL and sliding expiration.
///
/// Capacity is enforced per shard: each shard holds at most
/// `ceil(capacity / shard_count)` entries and recycles its least recently
/// used slot on overflow. Lookups on absent or expired keys return `None`;
/// nothing in the plain API can fail.
pub struct Cache<K, V> {
    shards: Box<[Shard<K, V>]>,
    mask: u32,
    hasher: KeyHasher<K>,
    loader: Option<LoaderFn<K, V>>,
    group: Group<K, V>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache with default options; see
    /// [`CacheBuilder`](crate::builder::CacheBuilder) for the full set.
    pub fn new(capacity: usize) -> Self {
        crate::builder::CacheBuilder::new(capacity).build()
    }

    pub(crate) fn from_parts(
        shards: Box<[Shard<K, V>]>,
        hasher: KeyHasher<K>,
        loader: Option<LoaderFn<K, V>>,
    ) -> Self {
        let mask = shards.len() as u32 - 1;
        Self {
            shards,
            mask,
            hasher,
            loader,
            group: Group::new(),
        }
    }

    #[inline]
    fn shard(&self, hash: u32) -> &Shard<K, V> {
        &self.shards[(hash & self.mask) as usize]
    }

    /// Returns the value for `key`, promoting it to most recently used.
    ///
    /// An entry past its expiry is dropped here and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let hash = self.hasher.hash32(key);
        self.shard(hash).get(hash, key)
    }

    /// Returns the value and its absolute expiry without touching recency
    /// or stats. `None` in the expiry slot means the entry never expires.
    pub fn peek(&self, key: &K) -> Option<(V, Option<SystemTime>)> {
        let hash = self.hasher.hash32(key);
        let (value, expires) = self.shard(hash).peek(hash, key)?;
        let wall = (expires != 0).then(|| coarse_clock::wall_time(expires));
        Some((value, wall))
    }

    /// Inserts `key → value`, evicting the shard's LRU entry on overflow.
    ///
    /// Returns the previous value (the replaced one, or the evicted
    /// victim's) and whether the key was already present. Replacing with
    /// `ttl == None` keeps the entry's existing expiry. TTLs have
    /// one-second resolution.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) -> (Option<V>, bool) {
        let hash = self.hasher.hash32(&key);
        self.shard(hash).set(hash, key, value, ttl)
    }

    /// Like [`set`](Self::set), but a present, non-expired entry is left
    /// untouched and returned.
    pub fn set_if_absent(&self, key: K, value: V, ttl: Option<Duration>) -> (Option<V>, bool) {
        let hash = self.hasher.hash32(&key);
        self.shard(hash).set_if_absent(hash, key, value, ttl)
    }

    /// Removes `key`, returning its value.
    pub fn delete(&self, key: &K) -> Option<V> {
        let hash = self.hasher.hash32(key);
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
    pub fn append_keys(&self, mut keys: Vec<K>) -> Vec<K> {
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
    /// deduplicating concurrent misses for the same key.
    ///
    /// `loader` falls back to the builder-configured default; with neither
    /// present the call fails with [`CacheError::LoaderMissing`]. On
    /// success the value is inserted with the loader-returned TTL before
    /// any sharing caller is released; on failure nothing is inserted and
    /// every sharing caller receives the same error.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use lrukit::{Cache, CancelToken, LoaderFn};
    ///
    /// let cache: Cache<String, String> = Cache::new(10);
    /// let loader: LoaderFn<String, String> =
    ///     Arc::new(|_token, key| Ok((format!("loaded:{key}"), None)));
    ///
    /// let token = CancelToken::new();
    /// let value = cache
    ///     .get_or_load(&token, &"config".to_string(), Some(&loader))
    ///     .unwrap();
    /// assert_eq!(value, "loaded:config");
    ///
    /// // The loaded value is now cached.
    /// assert_eq!(cache.get(&"config".to_string()), Some("loaded:config".to_string()));
    /// ```
    pub fn get_or_load(
        &self,
        token: &CancelToken,
        key: &K,
        loader: Option<&LoaderFn<K, V>>,
    ) -> Result<V, CacheError> {
        let hash = self.hasher.hash32(key);
        if let Some(value) = self.shard(hash).get(hash, key) {
            return Ok(value);
        }

        let loader = loader.or(self.loader.as_ref()).ok_or(CacheError::LoaderMissing)?;

        let (result, _shared) = self.group.work(key, || {
            if token.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            match loader(token, key) {
                Ok((value, ttl)) => {
                    self.shard(hash).set(hash, key.clone(), value.clone(), ttl);
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

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn debug_validate_invariants(&self) {
        for shard in self.shards.iter() {
            shard.debug_validate_invariants();
        }
    }
}
