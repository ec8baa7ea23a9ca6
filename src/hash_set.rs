//! An extensible, split-ordered hash set built from [`OrderedList`] buckets.
//!
//! Buckets grow one at a time, driven by load factor, using the
//! Shalev–Shavit split-ordering technique: elements are stored in their
//! bucket's list keyed by `(reverse_bits(hash), value)`, so that appending
//! bucket `k` is always a single suffix move out of bucket `k`'s parent — no
//! rehashing and no global rebuild.

use std::cmp::Ordering;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::RwLock;

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::ordered_list::OrderedList;
use crate::set::Set;

/// Default bucket count used by [`HashSet::default`].
pub const DEFAULT_INITIAL_BUCKETS: usize = 32;

/// Default `elements / buckets` ratio that triggers incremental growth.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 512.0;

/// An entry stored in a bucket list, ordered by reversed hash first and the
/// user value second — the split-ordering key from spec §4.C.
#[derive(Clone)]
struct Entry<T> {
    reverse_hash: u64,
    value: T,
}

impl<T: PartialEq> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.reverse_hash == other.reverse_hash && self.value == other.value
    }
}

impl<T: Eq> Eq for Entry<T> {}

impl<T: PartialOrd> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.reverse_hash.partial_cmp(&other.reverse_hash) {
            Some(Ordering::Equal) => self.value.partial_cmp(&other.value),
            ordering => ordering,
        }
    }
}

impl<T: Ord> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.reverse_hash
            .cmp(&other.reverse_hash)
            .then_with(|| self.value.cmp(&other.value))
    }
}

/// A concurrent, dynamically growing hash set over a sparse value domain.
///
/// Every operation takes a shared lock on the bucket *vector* (not on the
/// buckets' own lists) for the duration of one bucket delegation; growth
/// briefly takes the bucket vector's exclusive lock to append one bucket and
/// move its share of elements out of its parent.
pub struct HashSet<T, S = RandomState> {
    // Cache-line padded per bucket for the same reason the teacher's striped
    // map pads its per-stripe locks: adjacent buckets are touched by
    // unrelated keys under independent locks, and without padding those
    // locks can share a cache line and false-share under concurrent access.
    buckets: RwLock<Vec<CachePadded<OrderedList<Entry<T>>>>>,
    size: AtomicUsize,
    max_load_factor_bits: AtomicU32,
    hasher_builder: S,
}

impl<T> Default for HashSet<T, RandomState>
where
    T: Hash + Ord,
{
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BUCKETS, RandomState::default())
    }
}

impl<T, S> HashSet<T, S>
where
    T: Hash + Ord,
    S: BuildHasher,
{
    /// Creates a hash set with `initial_bucket_count` buckets (clamped to at
    /// least 1) and the given hasher.
    pub fn new(initial_bucket_count: usize, hasher: S) -> Self {
        let initial_bucket_count = initial_bucket_count.max(1);
        let buckets = (0..initial_bucket_count)
            .map(|_| CachePadded::new(OrderedList::new()))
            .collect();
        Self {
            buckets: RwLock::new(buckets),
            size: AtomicUsize::new(0),
            max_load_factor_bits: AtomicU32::new(DEFAULT_MAX_LOAD_FACTOR.to_bits()),
            hasher_builder: hasher,
        }
    }

    fn hash(&self, value: &T) -> u64 {
        let mut hasher = self.hasher_builder.build_hasher();
        value.hash(&mut hasher);
        hasher.finish()
    }

    /// Inserts `value`, returning `true` iff it was not already present.
    pub fn insert(&self, value: T) -> bool {
        let buckets = self.buckets.read().unwrap();
        let h = self.hash(&value);
        let bucket_index = select_bucket(buckets.len(), h);
        let entry = Entry {
            reverse_hash: h.reverse_bits(),
            value,
        };
        let inserted = buckets[bucket_index].insert(entry);

        if inserted {
            let count = self.size.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            let exceeded = count as f32 > buckets.len() as f32 * self.max_load_factor();
            let bucket_count = buckets.len();
            drop(buckets);
            if exceeded {
                trace!(count, bucket_count, "load factor exceeded, requesting growth");
                self.try_extend_buckets();
            }
        }
        inserted
    }

    /// Removes `value`, returning `true` iff it was present.
    pub fn erase(&self, value: &T) -> bool {
        let buckets = self.buckets.read().unwrap();
        let h = self.hash(value);
        let bucket_index = select_bucket(buckets.len(), h);
        let reverse_hash = h.reverse_bits();
        let removed = buckets[bucket_index].erase_by(|entry| {
            entry
                .reverse_hash
                .cmp(&reverse_hash)
                .then_with(|| entry.value.cmp(value))
        });

        if removed {
            self.size.fetch_sub(1, AtomicOrdering::Relaxed);
        }
        removed
    }

    /// Reports whether `value` is currently a member.
    pub fn contains(&self, value: &T) -> bool {
        let buckets = self.buckets.read().unwrap();
        let h = self.hash(value);
        let bucket_index = select_bucket(buckets.len(), h);
        let reverse_hash = h.reverse_bits();
        buckets[bucket_index].contains_by(|entry| {
            entry
                .reverse_hash
                .cmp(&reverse_hash)
                .then_with(|| entry.value.cmp(value))
        })
    }

    /// Eventually-consistent element count.
    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Current `elements / buckets` ratio.
    pub fn load_factor(&self) -> f32 {
        let bucket_count = self.buckets.read().unwrap().len();
        self.size() as f32 / bucket_count as f32
    }

    /// The load factor that triggers incremental bucket growth.
    pub fn max_load_factor(&self) -> f32 {
        f32::from_bits(self.max_load_factor_bits.load(AtomicOrdering::Relaxed))
    }

    /// Sets the load factor that triggers incremental bucket growth. Takes
    /// effect on the next `insert` that would exceed it; does not
    /// retroactively trigger growth by itself.
    pub fn set_max_load_factor(&self, factor: f32) {
        self.max_load_factor_bits
            .store(factor.to_bits(), AtomicOrdering::Relaxed);
    }

    /// Appends one bucket and moves its share of elements out of its parent
    /// bucket, if the load factor is still exceeded once the exclusive lock
    /// is held (another thread may have already grown the table).
    fn try_extend_buckets(&self) {
        let mut buckets = self.buckets.write().unwrap();

        let count = self.size();
        if count as f32 <= buckets.len() as f32 * self.max_load_factor() {
            return;
        }

        let new_bucket_index = buckets.len();
        let parent_index = new_bucket_index - bit_floor(new_bucket_index);
        buckets.push(CachePadded::new(OrderedList::new()));

        let threshold = (new_bucket_index as u64).reverse_bits();
        // Both are plain shared borrows: `OrderedList`'s own methods use
        // interior mutability, so no split-at-mut juggling is needed to hold
        // both a bucket and its about-to-be-populated child at once.
        let parent = &buckets[parent_index];
        let new_bucket = &buckets[new_bucket_index];
        parent.split_after(new_bucket, |entry: &Entry<T>| entry.reverse_hash >= threshold);

        debug!(
            new_bucket_count = buckets.len(),
            parent_index, "extended hash set bucket vector"
        );
    }
}

/// Largest power of two `<= x` (`0` maps to `0`).
fn bit_floor(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        1usize << (usize::BITS - 1 - x.leading_zeros())
    }
}

/// Selects the bucket for `hash` given the current bucket count, per the
/// split-ordering scheme in spec §4.C: a freshly appended bucket `k` always
/// shares its low bits with its "parent" `k - bit_floor(k)` until it is
/// itself selectable.
fn select_bucket(bucket_count: usize, hash: u64) -> usize {
    let mask = (bucket_count.next_power_of_two() as u64).wrapping_sub(1);
    let mut bucket = (hash & mask) as usize;
    if bucket >= bucket_count {
        bucket = (hash & (mask >> 1)) as usize;
    }
    bucket
}

impl<T, S> Set for HashSet<T, S>
where
    T: Hash + Ord,
    S: BuildHasher,
{
    type Elem = T;

    fn insert(&self, elem: T) -> bool {
        HashSet::insert(self, elem)
    }

    fn erase(&self, elem: &T) -> bool {
        HashSet::erase(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        HashSet::contains(self, elem)
    }

    fn size(&self) -> usize {
        HashSet::size(self)
    }
}
