//! A lock-free set over a fixed universe `[0, N)`, one bit per index.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::set::Set;

/// A lock-free bitset over indices `[0, len)`.
///
/// Storage is `ceil(len / 8)` atomic bytes, allocated once at construction and
/// never resized. Every operation is a single CAS loop on one byte; there is
/// no blocking and no allocation after construction.
///
/// # Memory ordering
///
/// A successful `insert`/`erase` CAS uses release ordering; the corresponding
/// failure and `contains` loads use relaxed ordering. This is enough to keep
/// the bitset's own bits consistent under concurrent CAS, but it does **not**
/// establish happens-before for any payload a caller associates with an
/// index out-of-band (e.g. a value stored elsewhere and only conceptually
/// linked to index `i`). Callers relying on such a handoff must add their own
/// fence or use a higher-level synchronized path.
pub struct BitVectorSet {
    bytes: Box<[AtomicU8]>,
    len: usize,
}

impl BitVectorSet {
    /// Allocates a bitset over `[0, len)`, all bits initially clear.
    pub fn new(len: usize) -> Self {
        let num_bytes = len.div_ceil(8);
        let bytes = (0..num_bytes).map(|_| AtomicU8::new(0)).collect();
        Self { bytes, len }
    }

    /// The size of the index universe this set was constructed with.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the universe is empty (`len == 0`); all operations on such a
    /// set return `false`.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically sets bit `index`. Returns `true` iff the bit transitioned
    /// 0 → 1. Returns `false` for `index >= len()` without touching memory.
    pub fn insert(&self, index: usize) -> bool {
        let Some((byte, mask)) = self.locate(index) else {
            return false;
        };

        let mut observed = byte.load(Ordering::Relaxed);
        loop {
            if observed & mask != 0 {
                return false;
            }
            let desired = observed | mask;
            match byte.compare_exchange_weak(
                observed,
                desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => observed = current,
            }
        }
    }

    /// Atomically clears bit `index`. Returns `true` iff the bit transitioned
    /// 1 → 0. Returns `false` for `index >= len()` without touching memory.
    pub fn erase(&self, index: usize) -> bool {
        let Some((byte, mask)) = self.locate(index) else {
            return false;
        };

        let mut observed = byte.load(Ordering::Relaxed);
        loop {
            if observed & mask == 0 {
                return false;
            }
            let desired = observed & !mask;
            match byte.compare_exchange_weak(
                observed,
                desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => observed = current,
            }
        }
    }

    /// Reads the current value of bit `index`. Returns `false` for
    /// `index >= len()`.
    pub fn contains(&self, index: usize) -> bool {
        let Some((byte, mask)) = self.locate(index) else {
            return false;
        };
        byte.load(Ordering::Relaxed) & mask != 0
    }

    fn locate(&self, index: usize) -> Option<(&AtomicU8, u8)> {
        if index >= self.len {
            return None;
        }
        Some((&self.bytes[index / 8], 1u8 << (index % 8)))
    }
}

impl Set for BitVectorSet {
    type Elem = usize;

    fn insert(&self, elem: usize) -> bool {
        BitVectorSet::insert(self, elem)
    }

    fn erase(&self, elem: &usize) -> bool {
        BitVectorSet::erase(self, *elem)
    }

    fn contains(&self, elem: &usize) -> bool {
        BitVectorSet::contains(self, *elem)
    }

    fn size(&self) -> usize {
        self.bytes
            .iter()
            .map(|b| b.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn out_of_range_is_always_false() {
        let set = BitVectorSet::new(8);
        assert!(!set.insert(8));
        assert!(!set.erase(8));
        assert!(!set.contains(8));
    }

    #[test]
    fn empty_universe() {
        let set = BitVectorSet::new(0);
        assert!(set.is_empty());
        assert!(!set.insert(0));
        assert!(!set.erase(0));
        assert!(!set.contains(0));
    }

    #[test]
    fn insert_erase_round_trip() {
        let set = BitVectorSet::new(256);
        assert!(!set.contains(42));
        assert!(set.insert(42));
        assert!(set.contains(42));
        assert!(!set.insert(42));
        assert!(set.erase(42));
        assert!(!set.contains(42));
        assert!(!set.erase(42));
    }

    #[test]
    fn independent_bits_in_same_byte() {
        let set = BitVectorSet::new(16);
        assert!(set.insert(0));
        assert!(set.insert(1));
        assert!(set.insert(7));
        assert!(set.contains(0));
        assert!(set.contains(1));
        assert!(set.contains(7));
        assert!(!set.contains(2));
        assert!(set.erase(1));
        assert!(set.contains(0));
        assert!(!set.contains(1));
        assert!(set.contains(7));
    }

    /// Mirrors `TestSets.cpp`'s per-thread change tracking: each thread keeps
    /// its own local (unsynchronized) tally of successful inserts minus
    /// successful erases per bit index. Since `insert`/`erase` only ever
    /// succeed on an actual 0→1 / 1→0 transition, summing every thread's
    /// tally after they all join must reproduce, for every bit, exactly the
    /// bit's final `contains` value (0 or 1) — never negative, and never
    /// anything else. A real undercount bug (e.g. an erase succeeding
    /// without a matching prior insert, or vice versa) would show up as a
    /// negative or out-of-{0,1} sum.
    #[test]
    fn parallel_adders_and_erasers_never_undercount() {
        let universe = 256;
        let set = Arc::new(BitVectorSet::new(universe));
        let rounds = 20_000;

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    let mut net_change = vec![0i64; universe];
                    for i in 0..rounds {
                        let bit = i % universe;
                        if set.insert(bit) {
                            net_change[bit] += 1;
                        }
                    }
                    net_change
                })
            })
            .chain((0..5).map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    let mut net_change = vec![0i64; universe];
                    for i in 0..rounds {
                        let bit = i % universe;
                        if set.erase(bit) {
                            net_change[bit] -= 1;
                        }
                    }
                    net_change
                })
            }))
            .collect();

        let mut total_net_change = vec![0i64; universe];
        for h in handles {
            let per_thread = h.join().unwrap();
            for (total, delta) in total_net_change.iter_mut().zip(per_thread) {
                *total += delta;
            }
        }

        for i in 0..universe {
            assert!(
                total_net_change[i] >= 0,
                "bit {i} went net-negative: {}",
                total_net_change[i]
            );
            let expected = if set.contains(i) { 1 } else { 0 };
            assert_eq!(
                total_net_change[i], expected,
                "bit {i}'s aggregate net change disagrees with its final state"
            );
        }
    }
}
