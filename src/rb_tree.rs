//! The red-black tree engine behind ordered associative containers.
//!
//! An [`RbTree`] stores values of type `V`, orders them by a key extracted with
//! `X: KeyOfValue<V>` under a strict weak ordering `C: Compare<X::Key>`, and
//! allocates one node per value from `A: Allocator`.
//!
//! Two insertion policies are provided so that both set/map-style containers
//! ([`RbTree::insert_unique`]) and multiset/multimap-style containers
//! ([`RbTree::insert_equal`]) can be built on top of the same engine.
//!
//! Elements never move once inserted: inserting or erasing one element leaves
//! every [`Position`] of every other element valid.

use core::{fmt, ptr};

use super::*;
use crate::construct::{create_with, destroy_and_deallocate};
use node::{erase_and_rebalance, insert_and_rebalance, Header, Link, Node, NodePtr};

mod check;
mod cursor;
mod iter;
mod node;
mod order;

pub use check::Violation;
pub use cursor::{Cursor, CursorMut, Position};
pub use iter::{IntoIter, Iter, Range};
pub use order::{Compare, Greater, Identity, KeyOfValue, Less, SelectFirst};

/// A self-balancing binary search tree.
///
/// See the [module documentation](self) for details.
pub struct RbTree<V, X, C, A>
where
    A: Allocator,
{
    header: Header<V>,
    len: usize,
    compare: C,
    nodes: TypedAlloc<Node<V>, A>,
    _marker: core::marker::PhantomData<(V, fn() -> X)>,
}

// Safety: the tree owns its nodes exactly like a `Box<Node<V>>` would, so it
// is `Send`/`Sync` under the same conditions as its parts.
unsafe impl<V, X, C, A> Send for RbTree<V, X, C, A>
where
    V: Send,
    C: Send,
    A: Allocator + Send,
{
}

unsafe impl<V, X, C, A> Sync for RbTree<V, X, C, A>
where
    V: Sync,
    C: Sync,
    A: Allocator + Sync,
{
}

/// Where a new value goes: under which parent, and on which side.
struct InsertPoint<V> {
    parent: Link<V>,
    left: bool,
}

impl<V, X, C, A> RbTree<V, X, C, A>
where
    A: Allocator,
{
    /// Create an empty tree with a default-constructed ordering, allocating
    /// nodes from `alloc`.
    #[inline]
    pub fn new_in(alloc: A) -> Self
    where
        C: Default,
    {
        Self::with_compare_in(C::default(), alloc)
    }

    /// Create an empty tree ordered by `compare`, allocating nodes from
    /// `alloc`.
    #[inline]
    pub const fn with_compare_in(compare: C, alloc: A) -> Self {
        RbTree {
            header: Header::new(),
            len: 0,
            compare,
            nodes: TypedAlloc::new(alloc),
            _marker: core::marker::PhantomData,
        }
    }

    /// The number of elements in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the tree empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The allocator nodes are allocated from.
    #[inline]
    pub fn allocator(&self) -> &A {
        self.nodes.allocator()
    }

    /// The ordering used by this tree.
    #[inline]
    pub fn compare(&self) -> &C {
        &self.compare
    }

    /// The smallest element, in O(1).
    #[inline]
    pub fn first(&self) -> Option<&V> {
        self.cursor_front().get()
    }

    /// The largest element, in O(1).
    #[inline]
    pub fn last(&self) -> Option<&V> {
        self.cursor_back().get()
    }

    /// An in-order iterator over the elements.
    #[inline]
    pub fn iter(&self) -> Iter<'_, V> {
        Iter::new(self.header.leftmost, self.header.rightmost, self.len)
    }

    /// A cursor at the smallest element, or at the end if the tree is empty.
    #[inline]
    pub fn cursor_front(&self) -> Cursor<'_, V> {
        Cursor::new(&self.header, self.header.leftmost)
    }

    /// A cursor at the largest element, or at the end if the tree is empty.
    #[inline]
    pub fn cursor_back(&self) -> Cursor<'_, V> {
        Cursor::new(&self.header, self.header.rightmost)
    }

    /// A cursor at the end position.
    #[inline]
    pub fn cursor_end(&self) -> Cursor<'_, V> {
        Cursor::new(&self.header, None)
    }

    /// A mutable cursor at the smallest element, or at the end if the tree is
    /// empty.
    #[inline]
    pub fn cursor_front_mut(&mut self) -> CursorMut<'_, V, X, C, A> {
        let node = self.header.leftmost;
        CursorMut::new(self, node)
    }

    /// A mutable cursor at the largest element, or at the end if the tree is
    /// empty.
    #[inline]
    pub fn cursor_back_mut(&mut self) -> CursorMut<'_, V, X, C, A> {
        let node = self.header.rightmost;
        CursorMut::new(self, node)
    }

    /// Erase every element.
    pub fn clear(&mut self) {
        let root = self.header.root;
        self.header.reset();
        self.len = 0;
        // Safety: the subtree is detached from the header, and we own it.
        unsafe { self.erase_subtree(root) };
    }

    /// Destroy every node of the subtree rooted at `node`.
    ///
    /// Recurses on right children and loops on left children, so the stack
    /// depth is bounded by the tree height.
    unsafe fn erase_subtree(&mut self, mut node: Link<V>) {
        while let Some(n) = node {
            self.erase_subtree((*n.as_ptr()).right);
            node = (*n.as_ptr()).left;
            destroy_and_deallocate(&self.nodes, n);
        }
    }

    /// Unlink `node`, move its value out, and release its memory.
    ///
    /// ### Safety
    ///
    /// `node` must be a live node of this tree.
    pub(crate) unsafe fn unlink_and_take(&mut self, node: NodePtr<V>) -> V {
        erase_and_rebalance(node, &mut self.header);
        self.len -= 1;
        let value = ptr::read(ptr::addr_of!((*node.as_ptr()).value));
        self.nodes.deallocate(node, 1);
        value
    }

    /// Unlink `node`, then drop and release it.
    ///
    /// ### Safety
    ///
    /// `node` must be a live node of this tree.
    unsafe fn unlink_and_destroy(&mut self, node: NodePtr<V>) {
        erase_and_rebalance(node, &mut self.header);
        self.len -= 1;
        destroy_and_deallocate(&self.nodes, node);
    }

    /// Erase the span `[curr, last)`, returning how many elements were erased.
    ///
    /// ### Safety
    ///
    /// `curr` and `last` must each be a live node of this tree or `None`, and
    /// `last` must be reachable from `curr` by successor steps.
    unsafe fn erase_span(&mut self, mut curr: Link<V>, last: Link<V>) -> usize {
        if curr == self.header.leftmost && last.is_none() {
            let erased = self.len;
            self.clear();
            return erased;
        }

        let mut erased = 0;
        while curr != last {
            let n = curr.expect("range end does not follow its start");
            // Erasing one node leaves every other node, `last` included, in
            // place.
            curr = node::successor(n);
            self.unlink_and_destroy(n);
            erased += 1;
        }
        erased
    }

    /// Does `node` belong to this tree? Walks up to the root.
    ///
    /// ### Safety
    ///
    /// `node` must be a live node of *some* tree.
    unsafe fn owns(&self, node: NodePtr<V>) -> bool {
        let mut x = node;
        while let Some(parent) = (*x.as_ptr()).parent {
            x = parent;
        }
        self.header.root == Some(x)
    }

    /// The element at `pos`, or `None` at the end.
    ///
    /// # Safety
    ///
    /// `pos` must be the end position or the position of an element of this
    /// tree that has not been erased since the position was obtained.
    #[inline]
    pub unsafe fn get_at(&self, pos: Position<V>) -> Option<&V> {
        self.cursor_at(pos).get()
    }

    /// A cursor at `pos`.
    ///
    /// # Safety
    ///
    /// Same as [`RbTree::get_at`].
    #[inline]
    pub unsafe fn cursor_at(&self, pos: Position<V>) -> Cursor<'_, V> {
        if let Some(node) = pos.node {
            debug_assert!(self.owns(node), "position does not belong to this tree");
        }
        Cursor::new(&self.header, pos.node)
    }

    /// A mutable cursor at `pos`.
    ///
    /// # Safety
    ///
    /// Same as [`RbTree::get_at`].
    #[inline]
    pub unsafe fn cursor_mut_at(&mut self, pos: Position<V>) -> CursorMut<'_, V, X, C, A> {
        if let Some(node) = pos.node {
            debug_assert!(self.owns(node), "position does not belong to this tree");
        }
        CursorMut::new(self, pos.node)
    }

    /// Erase the element at `pos` and return it. Erasing at the end position
    /// does nothing and returns `None`.
    ///
    /// Every other element's position stays valid.
    ///
    /// # Safety
    ///
    /// Same as [`RbTree::get_at`]. In particular, erasing the same position
    /// twice is undefined behavior; debug builds detect positions that belong
    /// to another tree.
    #[inline]
    pub unsafe fn erase_at(&mut self, pos: Position<V>) -> Option<V> {
        self.cursor_mut_at(pos).remove_current()
    }

    /// Erase every element in the half-open span `[first, last)`, returning
    /// how many were erased. Positions of elements outside the span stay
    /// valid.
    ///
    /// Safe code erases spans by key with [`RbTree::erase_key_range`]; a
    /// span between two arbitrary positions cannot be formed from borrowing
    /// cursors, since a `CursorMut` holds the tree exclusively.
    ///
    /// # Safety
    ///
    /// Both positions must satisfy the requirements of [`RbTree::get_at`], and
    /// `last` must be `first` or follow it in order. Debug builds detect
    /// positions that belong to another tree.
    pub unsafe fn erase_range(&mut self, first: Position<V>, last: Position<V>) -> usize {
        for node in [first.node, last.node].into_iter().flatten() {
            debug_assert!(self.owns(node), "position does not belong to this tree");
        }
        self.erase_span(first.node, last.node)
    }
}

impl<V, X, C, A> RbTree<V, X, C, A>
where
    X: KeyOfValue<V>,
    C: Compare<X::Key>,
    A: Allocator,
{
    /// Borrow the key of `node`.
    ///
    /// ### Safety
    ///
    /// `node` must stay live for `'n`.
    #[inline]
    unsafe fn key_of<'n>(node: NodePtr<V>) -> &'n X::Key
    where
        V: 'n,
    {
        X::key(&(*node.as_ptr()).value)
    }

    /// Is `key` less than the key of `node`?
    #[inline]
    fn key_less_node(&self, key: &X::Key, node: NodePtr<V>) -> bool {
        // Safety: `node` is live for the duration of the comparison.
        self.compare.less(key, unsafe { Self::key_of(node) })
    }

    /// Is the key of `node` less than `key`?
    #[inline]
    fn node_less_key(&self, node: NodePtr<V>, key: &X::Key) -> bool {
        // Safety: as above.
        self.compare.less(unsafe { Self::key_of(node) }, key)
    }

    /// The first node whose key is not less than `key`.
    fn lower_bound_node(&self, key: &X::Key) -> Link<V> {
        let mut bound = None;
        let mut curr = self.header.root;
        while let Some(node) = curr {
            // Safety: reachable nodes are live.
            curr = unsafe {
                if !self.node_less_key(node, key) {
                    bound = Some(node);
                    (*node.as_ptr()).left
                } else {
                    (*node.as_ptr()).right
                }
            };
        }
        bound
    }

    /// The first node whose key is greater than `key`.
    fn upper_bound_node(&self, key: &X::Key) -> Link<V> {
        let mut bound = None;
        let mut curr = self.header.root;
        while let Some(node) = curr {
            // Safety: reachable nodes are live.
            curr = unsafe {
                if self.key_less_node(key, node) {
                    bound = Some(node);
                    (*node.as_ptr()).left
                } else {
                    (*node.as_ptr()).right
                }
            };
        }
        bound
    }

    /// A node whose key is equivalent to `key`, if any.
    fn find_node(&self, key: &X::Key) -> Link<V> {
        self.lower_bound_node(key)
            .filter(|&node| !self.key_less_node(key, node))
    }

    /// Find an element whose key is equivalent to `key`.
    ///
    /// With duplicate keys, this is the first of them. The returned cursor is
    /// at the end position if there is no such element.
    #[inline]
    pub fn find(&self, key: &X::Key) -> Cursor<'_, V> {
        Cursor::new(&self.header, self.find_node(key))
    }

    /// Like [`RbTree::find`], but the cursor can erase.
    #[inline]
    pub fn find_mut(&mut self, key: &X::Key) -> CursorMut<'_, V, X, C, A> {
        let node = self.find_node(key);
        CursorMut::new(self, node)
    }

    /// Does the tree contain an element whose key is equivalent to `key`?
    #[inline]
    pub fn contains_key(&self, key: &X::Key) -> bool {
        self.find_node(key).is_some()
    }

    /// Borrow the element whose key is equivalent to `key`, if any.
    #[inline]
    pub fn get(&self, key: &X::Key) -> Option<&V> {
        self.find(key).get()
    }

    /// A cursor at the first element whose key is not less than `key`.
    #[inline]
    pub fn lower_bound(&self, key: &X::Key) -> Cursor<'_, V> {
        Cursor::new(&self.header, self.lower_bound_node(key))
    }

    /// Like [`RbTree::lower_bound`], but the cursor can erase.
    #[inline]
    pub fn lower_bound_mut(&mut self, key: &X::Key) -> CursorMut<'_, V, X, C, A> {
        let node = self.lower_bound_node(key);
        CursorMut::new(self, node)
    }

    /// A cursor at the first element whose key is greater than `key`.
    #[inline]
    pub fn upper_bound(&self, key: &X::Key) -> Cursor<'_, V> {
        Cursor::new(&self.header, self.upper_bound_node(key))
    }

    /// Like [`RbTree::upper_bound`], but the cursor can erase.
    #[inline]
    pub fn upper_bound_mut(&mut self, key: &X::Key) -> CursorMut<'_, V, X, C, A> {
        let node = self.upper_bound_node(key);
        CursorMut::new(self, node)
    }

    /// The half-open span `[lower_bound(key), upper_bound(key))` of elements
    /// whose keys are equivalent to `key`.
    #[inline]
    pub fn equal_range(&self, key: &X::Key) -> (Cursor<'_, V>, Cursor<'_, V>) {
        (self.lower_bound(key), self.upper_bound(key))
    }

    /// An iterator over the elements whose keys are equivalent to `key`.
    #[inline]
    pub fn equal_range_iter(&self, key: &X::Key) -> Range<'_, V> {
        Range::new(self.lower_bound_node(key), self.upper_bound_node(key))
    }

    /// The number of elements whose keys are equivalent to `key`.
    #[inline]
    pub fn count(&self, key: &X::Key) -> usize {
        self.equal_range_iter(key).count()
    }

    /// Where a value with `key` goes under the multi-insertion policy: after
    /// any equivalent elements.
    fn equal_insert_point(&self, key: &X::Key) -> InsertPoint<V> {
        let mut parent = None;
        let mut left = true;
        let mut curr = self.header.root;
        while let Some(node) = curr {
            parent = Some(node);
            left = self.key_less_node(key, node);
            // Safety: reachable nodes are live.
            curr = unsafe {
                if left {
                    (*node.as_ptr()).left
                } else {
                    (*node.as_ptr()).right
                }
            };
        }
        InsertPoint { parent, left }
    }

    /// Where a value with `key` goes under the unique-insertion policy, or the
    /// existing equivalent element.
    fn unique_insert_point(&self, key: &X::Key) -> Result<InsertPoint<V>, NodePtr<V>> {
        let point = self.equal_insert_point(key);

        // The only candidate for an equivalent element is the in-order
        // predecessor of the insertion point: the parent itself when inserting
        // to its right, or the parent's predecessor when inserting to its left.
        let candidate = match point.parent {
            None => return Ok(point),
            Some(parent) if point.left => {
                if self.header.leftmost == Some(parent) {
                    return Ok(point);
                }
                // Safety: `parent` is live and not the minimum.
                unsafe { node::predecessor(parent).unwrap_unchecked() }
            }
            Some(parent) => parent,
        };

        if self.node_less_key(candidate, key) {
            Ok(point)
        } else {
            Err(candidate)
        }
    }

    /// Allocate a node for `value` and link it in at `point`.
    fn insert_at(&mut self, point: InsertPoint<V>, value: V) -> Result<NodePtr<V>, AllocError> {
        let node = create_with(&self.nodes, || {
            Ok::<_, core::convert::Infallible>(Node::new(value))
        })
        .map_err(|e| e.into_alloc_error())?;

        // Safety: the node is freshly constructed and detached, and `point`
        // was computed against the current shape of the tree.
        unsafe { insert_and_rebalance(node, point.parent, point.left, &mut self.header) };
        self.len += 1;
        Ok(node)
    }

    /// Insert `value` unless an element with an equivalent key is already
    /// present.
    ///
    /// Returns a cursor at the inserted element and `true`, or a cursor at the
    /// existing element and `false`; in the latter case `value` is dropped.
    /// On allocation failure the tree is left unchanged.
    pub fn insert_unique(
        &mut self,
        value: V,
    ) -> Result<(CursorMut<'_, V, X, C, A>, bool), AllocError> {
        match self.unique_insert_point(X::key(&value)) {
            Ok(point) => {
                let node = self.insert_at(point, value)?;
                Ok((CursorMut::new(self, Some(node)), true))
            }
            Err(existing) => Ok((CursorMut::new(self, Some(existing)), false)),
        }
    }

    /// Insert `value`, placing it after any elements with equivalent keys.
    ///
    /// On allocation failure the tree is left unchanged.
    pub fn insert_equal(&mut self, value: V) -> Result<CursorMut<'_, V, X, C, A>, AllocError> {
        let point = self.equal_insert_point(X::key(&value));
        let node = self.insert_at(point, value)?;
        Ok(CursorMut::new(self, Some(node)))
    }

    /// Insert every value from `values` with [`RbTree::insert_unique`],
    /// returning how many were inserted.
    ///
    /// Stops at the first allocation failure; values inserted before it stay
    /// in the tree.
    pub fn insert_unique_iter<I>(&mut self, values: I) -> Result<usize, AllocError>
    where
        I: IntoIterator<Item = V>,
    {
        let mut inserted = 0;
        for value in values {
            let (_, new) = self.insert_unique(value)?;
            inserted += usize::from(new);
        }
        Ok(inserted)
    }

    /// Insert every value from `values` with [`RbTree::insert_equal`].
    ///
    /// Stops at the first allocation failure; values inserted before it stay
    /// in the tree.
    pub fn insert_equal_iter<I>(&mut self, values: I) -> Result<(), AllocError>
    where
        I: IntoIterator<Item = V>,
    {
        for value in values {
            self.insert_equal(value)?;
        }
        Ok(())
    }

    /// Erase every element whose key is equivalent to `key`, returning how many
    /// were erased.
    pub fn erase(&mut self, key: &X::Key) -> usize {
        let first = self.lower_bound_node(key);
        let last = self.upper_bound_node(key);
        // Safety: both bounds are live nodes or the end, and the upper bound
        // never precedes the lower bound.
        unsafe { self.erase_span(first, last) }
    }

    /// Erase every element whose key is not less than `from` and less than
    /// `to`, returning how many were erased.
    ///
    /// Erases nothing if `to` is ordered before `from`.
    pub fn erase_key_range(&mut self, from: &X::Key, to: &X::Key) -> usize {
        if self.compare.less(to, from) {
            return 0;
        }
        let first = self.lower_bound_node(from);
        let last = self.lower_bound_node(to);
        // Safety: as in `erase`; `from <= to` keeps `last` at or after
        // `first`.
        unsafe { self.erase_span(first, last) }
    }

    /// Clone the tree, including its shape and colors, into a new tree using
    /// clones of this tree's ordering and allocator.
    ///
    /// If an allocation fails, or a value's `clone` panics, everything
    /// allocated so far is released before the error (or panic) propagates.
    pub fn try_clone(&self) -> Result<Self, AllocError>
    where
        V: Clone,
        C: Clone,
        A: Clone,
    {
        let mut out = RbTree::with_compare_in(self.compare.clone(), self.allocator().clone());
        if let Some(root) = self.header.root {
            // Safety: `root` is a live node of `self`, and `out` is an empty
            // tree we exclusively own.
            unsafe {
                out.copy_subtree(root, None, true)?;
                let root = out.header.root.unwrap_unchecked();
                out.header.leftmost = Some(node::minimum(root));
                out.header.rightmost = Some(node::maximum(root));
            }
            out.len = self.len;
        }
        Ok(out)
    }

    /// Copy the subtree rooted at `src` and link the copy in as the root (when
    /// `parent` is `None`) or as the left or right child of `parent`.
    ///
    /// Each node is linked in as soon as it is created, so that if anything
    /// fails the partial copy is reachable from `self` and released by its
    /// drop.
    unsafe fn copy_subtree(
        &mut self,
        src: NodePtr<V>,
        parent: Link<V>,
        as_left: bool,
    ) -> Result<(), AllocError>
    where
        V: Clone,
    {
        let src_ref = &*src.as_ptr();
        let top = create_with(&self.nodes, || {
            Ok::<_, core::convert::Infallible>(Node::new(src_ref.value.clone()))
        })
        .map_err(|e| e.into_alloc_error())?;

        (*top.as_ptr()).color = src_ref.color;
        (*top.as_ptr()).parent = parent;
        match parent {
            None => self.header.root = Some(top),
            Some(p) if as_left => (*p.as_ptr()).left = Some(top),
            Some(p) => (*p.as_ptr()).right = Some(top),
        }

        if let Some(left) = src_ref.left {
            self.copy_subtree(left, Some(top), true)?;
        }
        if let Some(right) = src_ref.right {
            self.copy_subtree(right, Some(top), false)?;
        }
        Ok(())
    }
}

impl<V, X, C, A> Drop for RbTree<V, X, C, A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        let root = self.header.root.take();
        // Safety: we own every node reachable from the root.
        unsafe { self.erase_subtree(root) };
    }
}

impl<V, X, C, A> fmt::Debug for RbTree<V, X, C, A>
where
    V: fmt::Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<V, X, C, A, X2, C2, A2> PartialEq<RbTree<V, X2, C2, A2>> for RbTree<V, X, C, A>
where
    V: PartialEq,
    A: Allocator,
    A2: Allocator,
{
    fn eq(&self, other: &RbTree<V, X2, C2, A2>) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<V, X, C, A> Eq for RbTree<V, X, C, A>
where
    V: Eq,
    A: Allocator,
{
}

impl<'a, V, X, C, A> IntoIterator for &'a RbTree<V, X, C, A>
where
    A: Allocator,
{
    type Item = &'a V;
    type IntoIter = Iter<'a, V>;

    #[inline]
    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

impl<V, X, C, A> IntoIterator for RbTree<V, X, C, A>
where
    A: Allocator,
{
    type Item = V;
    type IntoIter = IntoIter<V, X, C, A>;

    #[inline]
    fn into_iter(self) -> IntoIter<V, X, C, A> {
        IntoIter::new(self)
    }
}
