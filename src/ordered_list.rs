//! A sorted concurrent linked list of block-packed nodes.
//!
//! Each node holds up to [`NODE_CAPACITY`] sorted elements in a `Vec`
//! instead of a single value, so a traversal touches far fewer nodes (and
//! acquires far fewer locks) than a classic one-element-per-node list. The
//! traversal discipline is hand-over-hand locking ("lock coupling"): a
//! reader or writer always holds the lock on the node it is inspecting and,
//! before moving on, acquires the lock on `next` before releasing the lock on
//! the current node. A separate head mutex protects the head pointer itself
//! and is released as soon as the first node is locked.

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::set::Set;

/// Maximum number of live elements held in a single node before it splits.
pub const NODE_CAPACITY: usize = 64;

struct NodeState<K> {
    slots: Vec<K>,
    next: Option<Arc<Node<K>>>,
}

struct Node<K> {
    state: RwLock<NodeState<K>>,
}

impl<K> Node<K> {
    fn empty() -> Arc<Self> {
        Arc::new(Node {
            state: RwLock::new(NodeState {
                slots: Vec::new(),
                next: None,
            }),
        })
    }

    fn with_slots(slots: Vec<K>) -> Arc<Self> {
        Arc::new(Node {
            state: RwLock::new(NodeState { slots, next: None }),
        })
    }
}

/// A write cursor bundles the `Arc` keeping a node alive together with its
/// exclusive lock guard, so hand-over-hand traversal can move the guard from
/// one local variable to another without re-locking.
///
/// The guard's lifetime is transmuted to `'static` purely as a bookkeeping
/// trick: it is never observed outside this struct, and the struct always
/// keeps `node` (the `Arc` whose heap allocation the guard actually borrows)
/// alive for at least as long as the guard itself, which is the only
/// soundness requirement a borrowed guard has. This mirrors the lifetime
/// extension the hand-over-hand cursor in the fine-grained list set performs
/// for exactly the same reason.
// Field order matters here: struct fields drop in declaration order, and
// `guard` borrows into the heap allocation that `node` (an `Arc`) keeps
// alive. `guard` must therefore be declared, and so dropped, before `node` —
// otherwise the final `Arc` clone could be released (and the allocation
// freed) while `guard`'s own `Drop` still needs to reach into it to unlock.
struct WriteCursor<K> {
    guard: RwLockWriteGuard<'static, NodeState<K>>,
    // Never read directly; kept only to back `guard`'s lifetime extension.
    #[allow(dead_code)]
    node: Arc<Node<K>>,
}

impl<K> WriteCursor<K> {
    fn new(node: Arc<Node<K>>) -> Self {
        let guard = node.state.write().unwrap();
        // SAFETY: see struct docs. `node` is stored alongside `guard` and is
        // never replaced or dropped while this cursor exists.
        let guard: RwLockWriteGuard<'static, NodeState<K>> =
            unsafe { std::mem::transmute(guard) };
        Self { guard, node }
    }
}

struct ReadCursor<K> {
    guard: RwLockReadGuard<'static, NodeState<K>>,
    // Never read directly; kept only to back `guard`'s lifetime extension.
    #[allow(dead_code)]
    node: Arc<Node<K>>,
}

impl<K> ReadCursor<K> {
    fn new(node: Arc<Node<K>>) -> Self {
        let guard = node.state.read().unwrap();
        // SAFETY: see `WriteCursor`'s docs; the same reasoning applies.
        let guard: RwLockReadGuard<'static, NodeState<K>> = unsafe { std::mem::transmute(guard) };
        Self { guard, node }
    }
}

/// A sorted, lock-coupled linked list.
///
/// `K` plays the role of the spec's stored key: for a plain ordered set of
/// `T`, `K = T`; [`crate::HashSet`] instantiates `K` as a reversed-hash/value
/// pair so that split-ordered bucket growth becomes a suffix move (see
/// [`OrderedList::split_after`]).
pub struct OrderedList<K> {
    head: Mutex<Arc<Node<K>>>,
    size: AtomicUsize,
}

impl<K> Default for OrderedList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> OrderedList<K> {
    /// Creates an empty list. An empty list always has exactly one, empty,
    /// head node (list invariant 5).
    pub fn new() -> Self {
        Self {
            head: Mutex::new(Node::empty()),
            size: AtomicUsize::new(0),
        }
    }

    /// Eventually-consistent element count: readers may observe a transient
    /// skew of at most one in-flight operation relative to the true count.
    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Whether the list currently holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns a clone of the head node's `Arc` without coupling the head
    /// lock to a node lock. Safe only where no concurrent structural change
    /// to the head pointer is in flight (tests inspecting a quiesced list);
    /// traversal methods must use [`OrderedList::head_write_cursor`] /
    /// [`OrderedList::head_read_cursor`] instead, which keep the head mutex
    /// held until the first node's own lock is acquired.
    #[cfg(test)]
    fn head_node(&self) -> Arc<Node<K>> {
        let head_guard = self.head.lock().unwrap();
        Arc::clone(&head_guard)
    }

    /// Acquires the head mutex, clones the head node's `Arc`, and locks that
    /// node for writing *before* releasing the head mutex — the hand-over-hand
    /// discipline extended to the head pointer itself (list invariant 5 /
    /// spec §4.B's locking protocol). The caller gets back both guards and
    /// decides when to drop the head guard: traversals that can never
    /// reassign `self.head` (insert, contains, split_after's own list) should
    /// drop it immediately; `erase_by` must keep it alive for as long as the
    /// first node it is inspecting might still need unlinking.
    fn head_write_cursor(&self) -> (MutexGuard<'_, Arc<Node<K>>>, WriteCursor<K>) {
        let head_guard = self.head.lock().unwrap();
        let first_node = Arc::clone(&head_guard);
        let cursor = WriteCursor::new(first_node);
        (head_guard, cursor)
    }

    /// Read-lock counterpart to [`OrderedList::head_write_cursor`].
    fn head_read_cursor(&self) -> (MutexGuard<'_, Arc<Node<K>>>, ReadCursor<K>) {
        let head_guard = self.head.lock().unwrap();
        let first_node = Arc::clone(&head_guard);
        let cursor = ReadCursor::new(first_node);
        (head_guard, cursor)
    }
}

impl<K: Ord> OrderedList<K> {
    /// Inserts `value`, returning `true` iff it was not already present.
    pub fn insert(&self, value: K) -> bool {
        let (head_guard, mut curr) = self.head_write_cursor();
        // `insert` never reassigns `self.head`, so the head mutex's job ends
        // as soon as the first node is locked (spec §4.B's locking protocol).
        drop(head_guard);

        loop {
            match curr.guard.slots.binary_search(&value) {
                Ok(_) => return false,
                Err(pos) if pos < curr.guard.slots.len() => {
                    // `value` belongs strictly inside this node's live range:
                    // by invariant 2, it cannot belong to any later node.
                    place_in_node(&mut curr.guard, pos, value);
                    self.size.fetch_add(1, AtomicOrdering::Relaxed);
                    return true;
                }
                Err(_) => {
                    // `value` is greater than every element in this node.
                    // Peek at `next` (hand-over-hand) to see whether it
                    // belongs in this node's slack or further down the chain.
                    match curr.guard.next.clone() {
                        None => {
                            let end = curr.guard.slots.len();
                            place_in_node(&mut curr.guard, end, value);
                            self.size.fetch_add(1, AtomicOrdering::Relaxed);
                            return true;
                        }
                        Some(next_node) => {
                            let next = WriteCursor::new(next_node);
                            let belongs_here = match next.guard.slots.first() {
                                Some(next_first) => value < *next_first,
                                None => true,
                            };
                            if belongs_here {
                                let end = curr.guard.slots.len();
                                place_in_node(&mut curr.guard, end, value);
                                self.size.fetch_add(1, AtomicOrdering::Relaxed);
                                return true;
                            }
                            curr = next;
                        }
                    }
                }
            }
        }
    }

    /// Removes `value`, returning `true` iff it was present.
    pub fn erase(&self, value: &K) -> bool {
        self.erase_by(|k| k.cmp(value))
    }

    /// Snapshot membership check.
    pub fn contains(&self, value: &K) -> bool {
        self.contains_by(|k| k.cmp(value))
    }

    /// Removes the element `cmp` identifies (`cmp(k) == Equal`), returning
    /// `true` iff one was found. `cmp` must agree with `K`'s `Ord`
    /// implementation (the same total order the list is sorted by).
    ///
    /// This is the primitive [`HashSet`](crate::HashSet) uses to probe a
    /// bucket by `(reversed hash, &T)` without needing to own a `K` (which
    /// for a bucket list would require cloning the value just to look it
    /// up).
    pub fn erase_by(&self, cmp: impl Fn(&K) -> std::cmp::Ordering) -> bool {
        let (head_guard, curr0) = self.head_write_cursor();
        // Unlike `insert`/`contains`, erasing the last element out of the
        // *head* node reassigns `self.head` itself (see the `prev == None`
        // arm below). The head mutex must therefore stay held for as long as
        // `curr` might still be that head node, so that no other traversal
        // can ever observe a head `Arc` whose node has already been unlinked
        // out from under it (the lost-update race spec §4.B's locking
        // protocol rules out). It is dropped the moment we descend past the
        // head node, since only the head node's removal ever touches
        // `self.head` — every later unlink instead rewrites `prev.next`.
        let mut head_guard = Some(head_guard);
        let mut prev: Option<WriteCursor<K>> = None;
        let mut curr = curr0;

        loop {
            match curr.guard.slots.binary_search_by(|k| cmp(k)) {
                Ok(idx) => {
                    curr.guard.slots.remove(idx);
                    if curr.guard.slots.is_empty() {
                        let orphaned_next = curr.guard.next.take();
                        match &mut prev {
                            Some(prev_cursor) => prev_cursor.guard.next = orphaned_next,
                            None => {
                                let head_guard = head_guard.as_mut().expect(
                                    "head mutex is still held while curr is the head node",
                                );
                                if let Some(next) = orphaned_next {
                                    **head_guard = next;
                                }
                                // else: `curr` was the sole node; leave the
                                // single empty head in place (invariant 5).
                            }
                        }
                    }
                    self.size.fetch_sub(1, AtomicOrdering::Relaxed);
                    return true;
                }
                Err(pos) if pos < curr.guard.slots.len() => {
                    // the sought key would sort inside this node but is
                    // absent; by invariant 2 it cannot be further down the
                    // chain.
                    return false;
                }
                Err(_) => match curr.guard.next.clone() {
                    None => return false,
                    Some(next_node) => {
                        let next = WriteCursor::new(next_node);
                        let absent = match next.guard.slots.first() {
                            Some(next_first) => cmp(next_first) == std::cmp::Ordering::Greater,
                            None => true,
                        };
                        if absent {
                            return false;
                        }
                        // We're leaving the head node behind for good; it can
                        // no longer become the empty-and-unlinked head, so
                        // the head mutex's job here is done.
                        head_guard = None;
                        prev = Some(curr);
                        curr = next;
                    }
                },
            }
        }
    }

    /// Comparator-based counterpart to [`OrderedList::contains`]; see
    /// [`OrderedList::erase_by`] for why this primitive exists.
    pub fn contains_by(&self, cmp: impl Fn(&K) -> std::cmp::Ordering) -> bool {
        let (head_guard, mut curr) = self.head_read_cursor();
        // Read-only: `self.head` can never be reassigned by a `contains`
        // call, so the head mutex's job ends as soon as the first node is
        // locked.
        drop(head_guard);

        loop {
            match curr.guard.slots.binary_search_by(|k| cmp(k)) {
                Ok(_) => return true,
                Err(pos) if pos < curr.guard.slots.len() => return false,
                Err(_) => match curr.guard.next.clone() {
                    None => return false,
                    Some(next_node) => {
                        let next = ReadCursor::new(next_node);
                        let absent = match next.guard.slots.first() {
                            Some(next_first) => cmp(next_first) == std::cmp::Ordering::Greater,
                            None => true,
                        };
                        if absent {
                            return false;
                        }
                        curr = next;
                    }
                },
            }
        }
    }

    /// Moves the suffix of elements satisfying `predicate` into `other`,
    /// replacing `other`'s prior contents outright.
    ///
    /// `predicate` must be monotone over the list's order: once it returns
    /// `true` for a stored key, it must return `true` for every key after it.
    /// It is evaluated under exclusive locks and must be pure and
    /// non-blocking — no lock besides the chain's own node locks is held
    /// across it.
    ///
    /// If no element satisfies `predicate`, `other` is left with an empty
    /// head and `self` is unchanged.
    pub fn split_after(&self, other: &OrderedList<K>, predicate: impl Fn(&K) -> bool) {
        let mut other_head_guard = other.head.lock().unwrap();
        let (head_guard, mut curr) = self.head_write_cursor();
        // `split_after` only ever truncates/rewrites `curr.next` on `self`'s
        // side; it never reassigns `self.head` (the head node stays the head
        // node, just possibly with fewer live slots), so `self`'s head mutex
        // can be released as soon as the first node is locked.
        drop(head_guard);

        loop {
            if let Some(split_at) = curr.guard.slots.iter().position(|k| predicate(k)) {
                let tail = curr.guard.slots.split_off(split_at);
                let new_node = Node::with_slots(tail);
                let rest_of_chain = curr.guard.next.take();
                let tail_len = {
                    let mut new_node_guard = new_node.state.write().unwrap();
                    new_node_guard.next = rest_of_chain;
                    new_node_guard.slots.len()
                };

                let moved = tail_len + chain_len(&new_node);
                *other_head_guard = new_node;
                other.size.store(moved, AtomicOrdering::Relaxed);
                self.size.fetch_sub(moved, AtomicOrdering::Relaxed);
                return;
            }

            match curr.guard.next.clone() {
                None => {
                    *other_head_guard = Node::empty();
                    other.size.store(0, AtomicOrdering::Relaxed);
                    return;
                }
                Some(next_node) => curr = WriteCursor::new(next_node),
            }
        }
    }
}

/// Sums slot counts across a chain not (yet) reachable from any list head,
/// so per-node read locks are enough for a consistent total.
fn chain_len<K>(head: &Arc<Node<K>>) -> usize {
    let mut total = 0;
    let mut current = Arc::clone(head);
    loop {
        let guard = current.state.read().unwrap();
        total += guard.slots.len();
        match guard.next.clone() {
            Some(next) => {
                drop(guard);
                current = next;
            }
            None => return total,
        }
    }
}

/// Inserts `value` at `pos` in `node`'s slots, splitting the node first if it
/// is already at [`NODE_CAPACITY`].
fn place_in_node<K: Ord>(node: &mut RwLockWriteGuard<'_, NodeState<K>>, pos: usize, value: K) {
    if node.slots.len() < NODE_CAPACITY {
        node.slots.insert(pos, value);
        return;
    }
    split_and_insert(node, value);
}

/// Splits a full node in half (by live-element count) and inserts `value`
/// into whichever half it belongs to, splicing the new node in after
/// `node` (ahead of whatever `node.next` already was).
fn split_and_insert<K: Ord>(node: &mut RwLockWriteGuard<'_, NodeState<K>>, value: K) {
    debug_assert_eq!(node.slots.len(), NODE_CAPACITY);

    let mid = node.slots.len() / 2;
    let mut upper = node.slots.split_off(mid);
    match upper.binary_search(&value) {
        Ok(_) => unreachable!("caller already proved value is absent"),
        Err(pos) => upper.insert(pos, value),
    }

    let new_node = Node::with_slots(upper);
    {
        let mut new_node_guard = new_node.state.write().unwrap();
        new_node_guard.next = node.next.take();
    }
    node.next = Some(new_node);
}

impl<K: Ord> Set for OrderedList<K> {
    type Elem = K;

    fn insert(&self, elem: K) -> bool {
        OrderedList::insert(self, elem)
    }

    fn erase(&self, elem: &K) -> bool {
        OrderedList::erase(self, elem)
    }

    fn contains(&self, elem: &K) -> bool {
        OrderedList::contains(self, elem)
    }

    fn size(&self) -> usize {
        OrderedList::size(self)
    }
}

/// Collects the live elements across the whole chain, in order. Intended for
/// tests and invariant checks, not hot-path use (it locks every node).
#[cfg(test)]
pub(crate) fn snapshot<K: Clone>(list: &OrderedList<K>) -> Vec<K> {
    let mut out = Vec::new();
    let mut current = list.head_node();
    loop {
        let guard = current.state.read().unwrap();
        out.extend(guard.slots.iter().cloned());
        match guard.next.clone() {
            Some(next) => {
                drop(guard);
                current = next;
            }
            None => break,
        }
    }
    out
}
