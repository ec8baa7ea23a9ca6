//! A stateless dispatcher over a dense bit-vector branch and a sparse
//! hash-set branch.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use crate::bit_vector_set::BitVectorSet;
use crate::hash_set::{HashSet, DEFAULT_INITIAL_BUCKETS};
use crate::set::Set;

/// Routes values of type `T` to the dense branch or the sparse branch.
///
/// A linearizer is a pure, stable, partial injection `T -> [0, SIZE)`:
/// `linearize(x)` must always return the same answer for the same `x`, and
/// no two distinct values may linearize to the same `Some` index. Values
/// mapped to `None` are routed to the hash-set branch instead and must
/// still support [`Hash`] and [`Ord`] there.
pub trait Linearizer<T> {
    /// Size of the dense branch's index universe.
    const SIZE: usize;

    /// Maps `value` to a dense-branch index, or `None` to route it to the
    /// sparse branch.
    fn linearize(&self, value: &T) -> Option<usize>;
}

/// A concurrent set over a value universe that a [`Linearizer`] partitions
/// into a bounded dense range (backed by a [`BitVectorSet`]) and an
/// unbounded sparse remainder (backed by a [`HashSet`]).
///
/// Dispatch is stateless and per-call: every operation evaluates
/// `linearizer.linearize(&value)` and forwards to whichever branch it names.
/// Because the linearizer is required to be stable, a value can never move
/// between branches across its lifetime in the set, so the two branches'
/// universes are disjoint by construction and the composed set is
/// linearizable whenever each branch is.
pub struct MixedSet<T, L, S = RandomState> {
    dense: BitVectorSet,
    sparse: HashSet<T, S>,
    linearizer: L,
}

impl<T, L> MixedSet<T, L, RandomState>
where
    T: Hash + Ord,
    L: Linearizer<T>,
{
    /// Creates a mixed set with the default hasher and the default sparse
    /// bucket count, sizing the dense branch to `L::SIZE`.
    pub fn new(linearizer: L) -> Self {
        Self::with_hasher(linearizer, RandomState::default())
    }
}

impl<T, L, S> MixedSet<T, L, S>
where
    T: Hash + Ord,
    L: Linearizer<T>,
    S: BuildHasher,
{
    /// Creates a mixed set with an explicit hasher for the sparse branch.
    pub fn with_hasher(linearizer: L, hasher: S) -> Self {
        Self {
            dense: BitVectorSet::new(L::SIZE),
            sparse: HashSet::new(DEFAULT_INITIAL_BUCKETS, hasher),
            linearizer,
        }
    }

    /// Inserts `value`, returning `true` iff it was not already present.
    pub fn insert(&self, value: T) -> bool {
        match self.linearizer.linearize(&value) {
            Some(index) => self.dense.insert(index),
            None => self.sparse.insert(value),
        }
    }

    /// Removes `value`, returning `true` iff it was present.
    pub fn erase(&self, value: &T) -> bool {
        match self.linearizer.linearize(value) {
            Some(index) => self.dense.erase(index),
            None => self.sparse.erase(value),
        }
    }

    /// Reports whether `value` is currently a member.
    pub fn contains(&self, value: &T) -> bool {
        match self.linearizer.linearize(value) {
            Some(index) => self.dense.contains(index),
            None => self.sparse.contains(value),
        }
    }

    /// Eventually-consistent element count, summed across both branches.
    pub fn size(&self) -> usize {
        self.dense.size() + self.sparse.size()
    }

    /// The dense branch, for callers that want to inspect or embed it
    /// directly rather than going through the linearizer.
    pub fn dense(&self) -> &BitVectorSet {
        &self.dense
    }

    /// The sparse branch, for callers that want to inspect or embed it
    /// directly rather than going through the linearizer.
    pub fn sparse(&self) -> &HashSet<T, S> {
        &self.sparse
    }
}

impl<T, L, S> Set for MixedSet<T, L, S>
where
    T: Hash + Ord,
    L: Linearizer<T>,
    S: BuildHasher,
{
    type Elem = T;

    fn insert(&self, elem: T) -> bool {
        MixedSet::insert(self, elem)
    }

    fn erase(&self, elem: &T) -> bool {
        MixedSet::erase(self, elem)
    }

    fn contains(&self, elem: &T) -> bool {
        MixedSet::contains(self, elem)
    }

    fn size(&self) -> usize {
        MixedSet::size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    struct RangeLinearizer;

    impl Linearizer<i64> for RangeLinearizer {
        const SIZE: usize = 100;

        fn linearize(&self, value: &i64) -> Option<usize> {
            if (0..100).contains(value) {
                Some(*value as usize)
            } else {
                None
            }
        }
    }

    #[test]
    fn dense_and_sparse_branches_partition_correctly() {
        let set = MixedSet::new(RangeLinearizer);
        for i in 0..200 {
            assert!(set.insert(i));
        }
        assert!(set.contains(&42));
        assert!(set.contains(&150));
        assert!(!set.contains(&-1));

        assert!(set.erase(&42));
        assert!(set.erase(&150));
        assert!(!set.contains(&42));
        assert!(!set.contains(&150));
        assert!(!set.erase(&42));

        assert_eq!(set.size(), 198);
    }

    /// A windowed linearizer over a cubic lattice `[-N, N)^3`, in the shape
    /// of a 3-component spatial key: each axis maps into `[0, 2N)` and the
    /// three axes are combined into a single dense index, exactly the kind
    /// of injection a voxel-grid or chunked-world caller would plug in.
    struct Vec3Linearizer<const N: i64>;

    impl<const N: i64> Vec3Linearizer<N> {
        const SPAN: i64 = 2 * N;
    }

    impl<const N: i64> Linearizer<(i64, i64, i64)> for Vec3Linearizer<N> {
        const SIZE: usize = (2 * N * 2 * N * 2 * N) as usize;

        fn linearize(&self, value: &(i64, i64, i64)) -> Option<usize> {
            let (x, y, z) = *value;
            if !(-N..N).contains(&x) || !(-N..N).contains(&y) || !(-N..N).contains(&z) {
                return None;
            }
            let (x, y, z) = (x + N, y + N, z + N);
            Some((x + y * Self::SPAN + z * Self::SPAN * Self::SPAN) as usize)
        }
    }

    #[test]
    fn vec3_linearizer_routes_every_in_range_point_to_the_dense_branch() {
        let set: MixedSet<(i64, i64, i64), Vec3Linearizer<64>> = MixedSet::new(Vec3Linearizer);
        for i in 0..128i64 {
            assert!(set.insert((i - 64, 0, 0)));
        }

        assert!(set.contains(&(10, 0, 0)));
        assert!(set.contains(&(63, 0, 0)));
        assert!(!set.contains(&(64, 0, 0)));

        assert!(set.erase(&(11, 0, 0)));
        assert!(set.erase(&(63, 0, 0)));
        assert!(!set.erase(&(11, 0, 0)));

        assert!(set.sparse().size() == 0);
    }

    #[test]
    fn out_of_range_points_fall_through_to_the_sparse_branch() {
        let set: MixedSet<(i64, i64, i64), Vec3Linearizer<64>> = MixedSet::new(Vec3Linearizer);
        assert!(set.insert((1_000, 0, 0)));
        assert!(set.contains(&(1_000, 0, 0)));
        assert_eq!(set.dense().size(), 0);
        assert_eq!(set.sparse().size(), 1);
    }

    #[quickcheck]
    fn matches_reference_set_across_both_branches(ops: Vec<(bool, i8)>) -> bool {
        use std::collections::BTreeSet;

        // Values in [-20, 20) land in the dense branch; everything else in
        // the sparse branch, so a single op sequence exercises both.
        struct SmallRangeLinearizer;
        impl Linearizer<i64> for SmallRangeLinearizer {
            const SIZE: usize = 40;

            fn linearize(&self, value: &i64) -> Option<usize> {
                if (-20..20).contains(value) {
                    Some((*value + 20) as usize)
                } else {
                    None
                }
            }
        }

        let set = MixedSet::new(SmallRangeLinearizer);
        let mut reference = BTreeSet::new();

        for (is_insert, value) in ops {
            let value = value as i64;
            if is_insert {
                if set.insert(value) != reference.insert(value) {
                    return false;
                }
            } else if set.erase(&value) != reference.remove(&value) {
                return false;
            }
        }

        reference.iter().all(|v| set.contains(v)) && set.size() == reference.len()
    }
}
