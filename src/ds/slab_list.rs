//! Intrusive circular doubly-linked list over a fixed slab of slots.
//!
//! All `capacity + 1` slots are allocated once up front and linked by
//! 32-bit indices; slot 0 is a permanent sentinel, so no operation ever
//! deals with an empty-list case or allocates.
//!
//! ```text
//!   slots (Box<[Slot<T>]>)
//!   ┌──────┬───────────────────────────────┐
//!   │ slot │ { prev, next, data }          │
//!   ├──────┼───────────────────────────────┤
//!   │  0   │ sentinel: next = MRU,         │
//!   │      │           prev = LRU / victim │
//!   │ 1..n │ payload slots                 │
//!   └──────┴───────────────────────────────┘
//!
//!   0 ─► [mru] ◄──► ... ◄──► [lru] ◄─ 0   (circular)
//! ```
//!
//! The shard keeps live entries packed at the front: every touch or insert
//! is a `move_to_front`, every delete or expiry a `move_to_back`, so
//! `back()` (`slots[0].prev`) is always the next victim — either a free
//! slot or the least recently used entry.

/// One slab slot: two neighbor indices plus the caller's payload.
#[derive(Debug)]
struct Slot<T> {
    prev: u32,
    next: u32,
    data: T,
}

/// Fixed-capacity circular list; see the module docs for layout.
#[derive(Debug)]
pub struct SlabList<T> {
    slots: Box<[Slot<T>]>,
}

impl<T: Default> SlabList<T> {
    /// Allocates `capacity + 1` slots (slot 0 is the sentinel) and links
    /// them into one circle: slot `k` starts with `prev = k-1`,
    /// `next = k+1`, wrapping at the ends.
    pub fn new(capacity: u32) -> Self {
        let len = capacity as usize + 1;
        let mut slots = Vec::with_capacity(len);
        for i in 0..len as u32 {
            slots.push(Slot {
                prev: if i == 0 { capacity } else { i - 1 },
                next: if i == capacity { 0 } else { i + 1 },
                data: T::default(),
            });
        }
        Self {
            slots: slots.into_boxed_slice(),
        }
    }
}

impl<T> SlabList<T> {
    /// Number of payload slots (excludes the sentinel).
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32 - 1
    }

    /// The victim slot: least recently used entry, or a free slot while
    /// the used region has not filled the slab yet.
    #[inline]
    pub fn back(&self) -> u32 {
        self.slots[0].prev
    }

    /// Payload of slot `i`.
    #[inline]
    pub fn node(&self, i: u32) -> &T {
        &self.slots[i as usize].data
    }

    /// Mutable payload of slot `i`.
    #[inline]
    pub fn node_mut(&mut self, i: u32) -> &mut T {
        &mut self.slots[i as usize].data
    }

    /// Relinks slot `i` directly after the sentinel (MRU position).
    ///
    /// A no-op when `i` is already at the front; safe for any linked slot.
    pub fn move_to_front(&mut self, i: u32) {
        if self.slots[0].next == i {
            return;
        }
        self.unlink(i);
        let first = self.slots[0].next;
        self.slots[i as usize].prev = 0;
        self.slots[i as usize].next = first;
        self.slots[0].next = i;
        self.slots[first as usize].prev = i;
    }

    /// Relinks slot `i` directly before the sentinel (victim position).
    pub fn move_to_back(&mut self, i: u32) {
        if self.slots[0].prev == i {
            return;
        }
        self.unlink(i);
        let last = self.slots[0].prev;
        self.slots[i as usize].next = 0;
        self.slots[i as usize].prev = last;
        self.slots[0].prev = i;
        self.slots[last as usize].next = i;
    }

    #[inline]
    fn unlink(&mut self, i: u32) {
        let prev = self.slots[i as usize].prev;
        let next = self.slots[i as usize].next;
        self.slots[prev as usize].next = next;
        self.slots[next as usize].prev = prev;
    }

    /// Walks `next` pointers from the sentinel, yielding payload slot
    /// indices in MRU-to-LRU order.
    pub fn iter_front(&self) -> impl Iterator<Item = u32> + '_ {
        let mut current = self.slots[0].next;
        std::iter::from_fn(move || {
            if current == 0 {
                return None;
            }
            let i = current;
            current = self.slots[i as usize].next;
            Some(i)
        })
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        let len = self.slots.len();
        let mut seen = vec![false; len];
        let mut current = 0u32;
        for _ in 0..len {
            assert!(!seen[current as usize], "cycle revisited slot {current}");
            seen[current as usize] = true;
            let next = self.slots[current as usize].next;
            assert_eq!(
                self.slots[next as usize].prev, current,
                "prev of {next} does not point back to {current}"
            );
            current = next;
        }
        assert_eq!(current, 0, "walk did not return to the sentinel");
        assert!(seen.iter().all(|&s| s), "ring does not cover every slot");
    }
}
