//! Common behavior shared by every set in this crate.

/// A concurrent set keyed on [`Set::Elem`].
///
/// All three owning containers ([`crate::BitVectorSet`], [`crate::HashSet`],
/// [`crate::MixedSet`]) implement this trait; [`crate::OrderedList`] also
/// implements it directly since it is usable standalone.
pub trait Set {
    /// The type of element stored in this set.
    type Elem;

    /// Inserts `elem`, returning `true` iff it was not already present.
    fn insert(&self, elem: Self::Elem) -> bool;

    /// Removes `elem`, returning `true` iff it was present.
    fn erase(&self, elem: &Self::Elem) -> bool;

    /// Reports whether `elem` is currently a member.
    fn contains(&self, elem: &Self::Elem) -> bool;

    /// Returns the current element count. Eventually consistent, not
    /// linearizable with respect to concurrent `insert`/`erase`.
    fn size(&self) -> usize;
}
