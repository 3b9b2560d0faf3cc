//! Robin Hood open-addressed table mapping hashes to slab slot indices.
//!
//! Each bucket is 8 bytes: one `u32` packs the high 24 bits of the hash
//! with an 8-bit distance-from-ideal-bucket (DIB), the other holds the
//! referenced node index.
//!
//! ```text
//!   bucket: { hdib: u32, index: u32 }
//!            └─ hash24 ──┬─ dib ─┘
//!               bits 31..8  bits 7..0   (dib == 0 ⇒ empty)
//! ```
//!
//! The table never stores keys. Lookups pre-filter on `hash24` and defer
//! full key comparison to a caller-supplied closure over node indices,
//! which keeps the table payload-agnostic and lets both shard flavors
//! share it. Insertion swaps the candidate with any richer resident
//! (smaller DIB), bounding probe variance; deletion backward-shifts the
//! following chain so probes never need tombstones.
//!
//! Capacity is a power of two at least `ceil(cap * 1.2)` with a floor of
//! 8, so the load factor stays at or below ~83%.

const DIB_BITS: u32 = 8;
const MAX_DIB: u32 = (1 << DIB_BITS) - 1;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    hdib: u32,
    index: u32,
}

impl Bucket {
    #[inline]
    fn dib(self) -> u32 {
        self.hdib & MAX_DIB
    }

    #[inline]
    fn hash24(self) -> u32 {
        self.hdib >> DIB_BITS
    }
}

/// Open-addressed hash → node-index table; see the module docs.
#[derive(Debug)]
pub struct RhTable {
    buckets: Box<[Bucket]>,
    mask: u32,
    len: u32,
}

impl RhTable {
    /// Sizes the bucket array for `capacity` entries plus ~20% slack.
    pub fn new(capacity: u32) -> Self {
        let slots = ((u64::from(capacity) * 6 + 4) / 5).max(8).next_power_of_two();
        Self {
            buckets: vec![Bucket::default(); slots as usize].into_boxed_slice(),
            mask: (slots - 1) as u32,
            len: 0,
        }
    }

    /// Number of occupied buckets.
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Returns `true` if no entries are stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up the node index stored for `hash`.
    ///
    /// `key_eq` is called with a candidate node index whenever the stored
    /// `hash24` matches, and must report whether that node holds the query
    /// key.
    pub fn get(&self, hash: u32, key_eq: impl Fn(u32) -> bool) -> Option<u32> {
        let subhash = hash >> DIB_BITS;
        let mut i = subhash & self.mask;
        loop {
            let b = self.buckets[i as usize];
            if b.dib() == 0 {
                return None;
            }
            if b.hash24() == subhash && key_eq(b.index) {
                return Some(b.index);
            }
            i = (i + 1) & self.mask;
        }
    }

    /// Inserts `hash → index`, displacing richer residents Robin Hood
    /// style. Returns the previously stored index when the key was already
    /// present (its bucket is re-pointed at `index`).
    pub fn set(&mut self, hash: u32, index: u32, key_eq: impl Fn(u32) -> bool) -> Option<u32> {
        let subhash = hash >> DIB_BITS;
        let mut hdib = (subhash << DIB_BITS) | 1;
        let mut index = index;
        let mask = self.mask;
        let mut i = subhash & mask;
        loop {
            let b = self.buckets[i as usize];
            if b.dib() == 0 {
                self.buckets[i as usize] = Bucket { hdib, index };
                self.len += 1;
                return None;
            }
            // An equal key can only be met before the first swap, so the
            // query-key comparison stays valid for the whole scan.
            if b.hash24() == hdib >> DIB_BITS && key_eq(b.index) {
                let prev = b.index;
                self.buckets[i as usize] = Bucket { hdib, index };
                return Some(prev);
            }
            if b.dib() < hdib & MAX_DIB {
                self.buckets[i as usize] = Bucket { hdib, index };
                hdib = b.hdib;
                index = b.index;
            }
            i = (i + 1) & mask;
            debug_assert!(hdib & MAX_DIB < MAX_DIB, "probe chain exceeded DIB width");
            hdib += 1;
        }
    }

    /// Removes the entry for `hash` whose node satisfies `key_eq`,
    /// returning the stored index.
    pub fn delete(&mut self, hash: u32, key_eq: impl Fn(u32) -> bool) -> Option<u32> {
        let subhash = hash >> DIB_BITS;
        let mut i = subhash & self.mask;
        loop {
            let b = self.buckets[i as usize];
            if b.dib() == 0 {
                return None;
            }
            if b.hash24() == subhash && key_eq(b.index) {
                self.shift_back(i);
                return Some(b.index);
            }
            i = (i + 1) & self.mask;
        }
    }

    /// Removes the entry for `hash` that points at exactly `index`.
    ///
    /// Used when the caller already knows which node is being unlinked
    /// (victim recycling), so no key comparison is needed. Returns whether
    /// an entry was removed.
    pub fn delete_index(&mut self, hash: u32, index: u32) -> bool {
        let subhash = hash >> DIB_BITS;
        let mut i = subhash & self.mask;
        loop {
            let b = self.buckets[i as usize];
            if b.dib() == 0 {
                return false;
            }
            if b.index == index {
                self.shift_back(i);
                return true;
            }
            i = (i + 1) & self.mask;
        }
    }

    /// Node indices of all occupied buckets, in unspecified order.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.buckets
            .iter()
            .filter(|b| b.dib() != 0)
            .map(|b| b.index)
    }

    fn shift_back(&mut self, mut i: u32) {
        let mask = self.mask;
        loop {
            let next = (i + 1) & mask;
            let nb = self.buckets[next as usize];
            if nb.dib() <= 1 {
                self.buckets[i as usize] = Bucket::default();
                break;
            }
            self.buckets[i as usize] = Bucket {
                hdib: nb.hdib - 1,
                index: nb.index,
            };
            i = next;
        }
        self.len -= 1;
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let size = self.buckets.len() as u32;
        let mut occupied = 0;
        for (p, b) in self.buckets.iter().enumerate() {
            if b.dib() == 0 {
                continue;
            }
            occupied += 1;
            let home = b.hash24() & self.mask;
            let distance = (p as u32 + size - home) & self.mask;
            assert_eq!(
                b.dib(),
                distance + 1,
                "bucket {p} dib {} disagrees with distance {distance}",
                b.dib()
            );
        }
        assert_eq!(occupied, self.len, "len disagrees with occupancy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: u64) -> u32 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish() as u32
    }

    /// Test harness standing in for a shard: node slab is a plain Vec of
    /// keys, node index = position in the Vec.
    struct Harness {
        table: RhTable,
        nodes: Vec<u64>,
    }

    impl Harness {
        fn new(capacity: u32) -> Self {
            Self {
                table: RhTable::new(capacity),
                nodes: vec![u64::MAX], // index 0 unused, as in the shard
            }
        }

        fn insert(&mut self, key: u64) {
            let index = self.nodes.len() as u32;
            self.nodes.push(key);
            let nodes = &self.nodes;
            let prev = self
                .table
                .set(hash_of(key), index, |i| nodes[i as usize] == key);
            assert!(prev.is_none(), "duplicate insert of {key}");
        }

        fn lookup(&self, key: u64) -> Option<u32> {
            let nodes = &self.nodes;
            self.table
                .get(hash_of(key), |i| nodes[i as usize] == key)
        }

        fn remove(&mut self, key: u64) -> Option<u32> {
            let nodes = &self.nodes;
            self.table
                .delete(hash_of(key), |i| nodes[i as usize] == key)
        }
    }

    #[test]
    fn set_get_delete_round_trip() {
        let mut h = Harness::new(64);
        for key in 0..48u64 {
            h.insert(key);
        }
        h.table.debug_validate_invariants();
        assert_eq!(h.table.len(), 48);

        for key in 0..48u64 {
            assert!(h.lookup(key).is_some(), "key {key} missing");
        }
        assert_eq!(h.lookup(999), None);

        assert!(h.remove(17).is_some());
        assert_eq!(h.lookup(17), None);
        assert_eq!(h.remove(17), None);
        assert_eq!(h.table.len(), 47);
        h.table.debug_validate_invariants();
    }

    #[test]
    fn set_existing_key_repoints_index() {
        let mut h = Harness::new(8);
        h.insert(7);
        let old = h.lookup(7).unwrap();

        // Re-point key 7 at a different node holding the same key.
        let index = h.nodes.len() as u32;
        h.nodes.push(7);
        let nodes = &h.nodes;
        let prev = h.table.set(hash_of(7), index, |i| nodes[i as usize] == 7);
        assert_eq!(prev, Some(old));
        assert_eq!(h.lookup(7), Some(index));
        assert_eq!(h.table.len(), 1);
    }

    #[test]
    fn delete_index_targets_exact_node() {
        let mut h = Harness::new(8);
        h.insert(1);
        h.insert(2);
        let idx = h.lookup(2).unwrap();

        assert!(h.table.delete_index(hash_of(2), idx));
        assert_eq!(h.lookup(2), None);
        assert!(h.lookup(1).is_some());

        // A second attempt finds nothing.
        assert!(!h.table.delete_index(hash_of(2), idx));
    }

    #[test]
    fn colliding_chain_survives_backward_shift_deletion() {
        // All keys share one home bucket and one hash24, forcing a single
        // probe chain and full-key comparisons on every lookup.
        let capacity = 100u32;
        let mut table = RhTable::new(capacity);
        let nodes: Vec<u64> = (0..=u64::from(capacity)).collect();
        let colliding = |_k: u64| -> u32 { 0xABCDEF << DIB_BITS };

        // ~78% load on the 128-bucket table.
        for key in 1..=u64::from(capacity) {
            let index = key as u32;
            let prev = table.set(colliding(key), index, |i| nodes[i as usize] == key);
            assert!(prev.is_none());
        }
        table.debug_validate_invariants();

        for key in (1..=u64::from(capacity)).step_by(3) {
            assert!(table
                .delete(colliding(key), |i| nodes[i as usize] == key)
                .is_some());
        }
        table.debug_validate_invariants();

        for key in 1..=u64::from(capacity) {
            let found = table
                .get(colliding(key), |i| nodes[i as usize] == key)
                .is_some();
            assert_eq!(found, (key - 1) % 3 != 0, "key {key} presence wrong");
        }
    }

    #[test]
    fn indices_reports_every_occupied_bucket() {
        let mut h = Harness::new(16);
        for key in 0..10u64 {
            h.insert(key);
        }
        let mut indices: Vec<u32> = h.table.indices().collect();
        indices.sort_unstable();
        let expected: Vec<u32> = (1..=10).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn minimum_table_has_eight_buckets() {
        let table = RhTable::new(1);
        assert_eq!(table.mask, 7);
        assert!(table.is_empty());
    }
}
