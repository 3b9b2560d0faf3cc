//! Seeded key hashing for shard and table-slot selection.
//!
//! Every cache instance draws a random seed at construction and hashes it
//! ahead of the key, so bucket layouts differ between instances and a key
//! set that collides in one cache does not collide in another. The low 32
//! bits of the digest select the shard and the table slot.
//!
//! Callers that need a specific distribution (or a faster function for
//! their key type) can override the whole digest with
//! [`CacheBuilder::hasher`](crate::builder::CacheBuilder::hasher).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// User-supplied replacement for the default key hash.
pub type HashFn<K> = Arc<dyn Fn(&K) -> u64 + Send + Sync>;

/// Per-cache key hasher: seeded platform hash with optional override.
pub(crate) struct KeyHasher<K> {
    seed: u64,
    custom: Option<HashFn<K>>,
}

impl<K> Clone for KeyHasher<K> {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            custom: self.custom.clone(),
        }
    }
}

impl<K: Hash> KeyHasher<K> {
    pub(crate) fn new(seed: u64, custom: Option<HashFn<K>>) -> Self {
        Self { seed, custom }
    }

    /// Full 64-bit digest for `key`.
    #[inline]
    pub(crate) fn hash64(&self, key: &K) -> u64 {
        match &self.custom {
            Some(f) => f(key),
            None => {
                let mut hasher = DefaultHasher::new();
                self.seed.hash(&mut hasher);
                key.hash(&mut hasher);
                hasher.finish()
            }
        }
    }

    /// Low 32 bits of the digest; selects shard and table slot.
    #[inline]
    pub(crate) fn hash32(&self, key: &K) -> u32 {
        self.hash64(key) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_seed_is_deterministic() {
        let hasher: KeyHasher<&str> = KeyHasher::new(42, None);
        assert_eq!(hasher.hash64(&"user:123"), hasher.hash64(&"user:123"));
        assert_eq!(hasher.hash32(&"user:123"), hasher.hash32(&"user:123"));
    }

    #[test]
    fn different_seeds_change_the_digest() {
        let a: KeyHasher<u64> = KeyHasher::new(100, None);
        let b: KeyHasher<u64> = KeyHasher::new(200, None);
        let same = (0..64u64).filter(|k| a.hash64(k) == b.hash64(k)).count();
        assert!(same < 4, "{same} of 64 digests collided across seeds");
    }

    #[test]
    fn custom_hasher_overrides_default() {
        let hasher: KeyHasher<u64> = KeyHasher::new(7, Some(Arc::new(|k| k.wrapping_mul(3))));
        assert_eq!(hasher.hash64(&10), 30);
        assert_eq!(hasher.hash32(&10), 30);
    }
}
