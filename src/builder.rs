//! Cache configuration.
//!
//! ## Example
//!
//! ```
//! use lrukit::{Cache, CacheBuilder};
//!
//! let cache: Cache<u64, String> = CacheBuilder::new(10_000)
//!     .shards(32)
//!     .sliding(true)
//!     .build();
//! cache.set(1, "hello".to_string(), None);
//! assert_eq!(cache.get(&1), Some("hello".to_string()));
//! ```

use std::hash::Hash;
use std::thread;

use crate::cache::{Cache, LoaderFn, StopFn};
use crate::ds::coarse_clock;
use crate::hasher::{HashFn, KeyHasher};
use crate::shard::Shard;

/// Shard counts are powers of two in this range; the default scales with
/// the host's parallelism.
const MAX_SHARDS: usize = 512;

/// Builder for [`Cache`] instances.
///
/// All options are optional; `CacheBuilder::new(capacity).build()` matches
/// [`Cache::new`].
pub struct CacheBuilder<K, V> {
    capacity: usize,
    shards: Option<usize>,
    sliding: bool,
    hasher: Option<HashFn<K>>,
    loader: Option<LoaderFn<K, V>>,
    stop: Option<StopFn<V>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Starts a builder for a cache holding roughly `capacity` entries.
    ///
    /// Capacity is split evenly across shards
    /// (`ceil(capacity / shard_count)` each, minimum one), so the exact
    /// total is a per-shard quota rather than a global bound.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shards: None,
            sliding: false,
            hasher: None,
            loader: None,
            stop: None,
        }
    }

    /// Overrides the shard count; rounded up to a power of two and clamped
    /// to `[1, 512]`. Defaults to `next_pow2(available_parallelism * 16)`.
    pub fn shards(mut self, count: usize) -> Self {
        self.shards = Some(count);
        self
    }

    /// Enables sliding expiration: a successful `get` refreshes the
    /// entry's expiry to `now + ttl`.
    pub fn sliding(mut self, sliding: bool) -> Self {
        self.sliding = sliding;
        self
    }

    /// Replaces the default seeded hasher with `f`. The low 32 bits of
    /// the digest select the shard and the table slot.
    pub fn hasher(mut self, f: HashFn<K>) -> Self {
        self.hasher = Some(f);
        self
    }

    /// Installs a default loader for
    /// [`get_or_load`](Cache::get_or_load).
    pub fn loader(mut self, f: LoaderFn<K, V>) -> Self {
        self.loader = Some(f);
        self
    }

    /// Installs a release hook invoked on values when they expire during a
    /// lookup or are deleted.
    pub fn on_stop(mut self, f: StopFn<V>) -> Self {
        self.stop = Some(f);
        self
    }

    /// Builds the cache, allocating every shard's node slab and bucket
    /// table up front.
    pub fn build(self) -> Cache<K, V> {
        coarse_clock::ensure_ticker();

        let shard_count = shard_count(self.shards);
        let per_shard = per_shard_capacity(self.capacity, shard_count);
        let hasher = KeyHasher::new(rand::random::<u64>(), self.hasher);

        let shards: Vec<Shard<K, V>> = (0..shard_count)
            .map(|_| Shard::new(per_shard, hasher.clone(), self.sliding, self.stop.clone()))
            .collect();
        log::debug!(
            "cache built: capacity={} shards={shard_count} per_shard={per_shard} sliding={}",
            self.capacity,
            self.sliding
        );

        Cache::from_parts(shards.into_boxed_slice(), hasher, self.loader)
    }
}

pub(crate) fn shard_count(requested: Option<usize>) -> usize {
    let count = requested.unwrap_or_else(|| {
        let parallelism = thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
        parallelism * 16
    });
    count.clamp(1, MAX_SHARDS).next_power_of_two().min(MAX_SHARDS)
}

pub(crate) fn per_shard_capacity(capacity: usize, shard_count: usize) -> u32 {
    let capacity = capacity.max(1) as u64;
    let shard_count = shard_count as u64;
    let per_shard = (capacity + shard_count - 1) / shard_count;
    per_shard.clamp(1, u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_count_rounds_to_power_of_two() {
        assert_eq!(shard_count(Some(1)), 1);
        assert_eq!(shard_count(Some(3)), 4);
        assert_eq!(shard_count(Some(8)), 8);
        assert_eq!(shard_count(Some(100)), 128);
        assert_eq!(shard_count(Some(0)), 1);
        assert_eq!(shard_count(Some(100_000)), MAX_SHARDS);
    }

    #[test]
    fn default_shard_count_is_power_of_two() {
        let count = shard_count(None);
        assert!(count.is_power_of_two());
        assert!((1..=MAX_SHARDS).contains(&count));
    }

    #[test]
    fn per_shard_capacity_is_ceiling_division() {
        assert_eq!(per_shard_capacity(100, 8), 13);
        assert_eq!(per_shard_capacity(64, 8), 8);
        assert_eq!(per_shard_capacity(1, 8), 1);
        assert_eq!(per_shard_capacity(0, 4), 1);
    }

    #[test]
    fn built_cache_round_trips() {
        let cache: Cache<u64, u64> = CacheBuilder::new(100).shards(4).build();
        cache.set(1, 2, None);
        assert_eq!(cache.get(&1), Some(2));
        assert_eq!(cache.len(), 1);
    }
}
