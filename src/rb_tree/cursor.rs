use core::{fmt, marker::PhantomData};

use super::node::{predecessor, successor, Header, Link, NodePtr};
use super::*;

/// A detached position in an [`RbTree`]: either an element or the end.
///
/// Positions are plain handles. They stay valid across insertion and erasure of
/// *other* elements; only erasing the element itself, clearing, or dropping
/// the tree invalidates a position. Because the tree cannot check that a
/// position is still valid, every method that accepts one is `unsafe`.
pub struct Position<V> {
    pub(super) node: Link<V>,
    _marker: PhantomData<*const V>,
}

impl<V> Position<V> {
    #[inline]
    pub(super) const fn new(node: Link<V>) -> Self {
        Position {
            node,
            _marker: PhantomData,
        }
    }

    /// The end position of any tree.
    #[inline]
    pub const fn end() -> Self {
        Position::new(None)
    }

    /// Is this the end position?
    #[inline]
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }
}

impl<V> Clone for Position<V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Position<V> {}

impl<V> PartialEq for Position<V> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<V> Eq for Position<V> {}

impl<V> fmt::Debug for Position<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "Position({node:p})"),
            None => f.write_str("Position(end)"),
        }
    }
}

/// Step forward from `node`; the end wraps around to the first element.
#[inline]
fn step_next<V>(header: &Header<V>, node: Link<V>) -> Link<V> {
    match node {
        // Safety: `node` is a live node of the tree that owns `header`.
        Some(node) => unsafe { successor(node) },
        None => header.leftmost,
    }
}

/// Step backward from `node`; the end wraps around to the last element.
#[inline]
fn step_prev<V>(header: &Header<V>, node: Link<V>) -> Link<V> {
    match node {
        // Safety: as above.
        Some(node) => unsafe { predecessor(node) },
        None => header.rightmost,
    }
}

#[inline]
fn value_of<'a, V>(node: Link<V>) -> Option<&'a V> {
    // Safety: callers tie `'a` to a borrow of the tree owning `node`.
    node.map(|node: NodePtr<V>| unsafe { &(*node.as_ptr()).value })
}

/// A read-only cursor over the elements of an [`RbTree`].
///
/// A cursor always rests on an element or on the end position. Moving past the
/// last element reaches the end; moving again wraps to the first element, and
/// symmetrically backwards.
pub struct Cursor<'a, V> {
    header: &'a Header<V>,
    node: Link<V>,
}

impl<'a, V> Cursor<'a, V> {
    #[inline]
    pub(super) fn new(header: &'a Header<V>, node: Link<V>) -> Self {
        Cursor { header, node }
    }

    /// The element under the cursor, or `None` at the end.
    #[inline]
    pub fn get(&self) -> Option<&'a V> {
        value_of(self.node)
    }

    /// Is the cursor at the end position?
    #[inline]
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    /// Move to the in-order successor.
    #[inline]
    pub fn move_next(&mut self) {
        self.node = step_next(self.header, self.node);
    }

    /// Move to the in-order predecessor.
    #[inline]
    pub fn move_prev(&mut self) {
        self.node = step_prev(self.header, self.node);
    }

    /// The element after the cursor, without moving.
    #[inline]
    pub fn peek_next(&self) -> Option<&'a V> {
        value_of(step_next(self.header, self.node))
    }

    /// The element before the cursor, without moving.
    #[inline]
    pub fn peek_prev(&self) -> Option<&'a V> {
        value_of(step_prev(self.header, self.node))
    }

    /// A detached handle to the cursor's position.
    #[inline]
    pub fn position(&self) -> Position<V> {
        Position::new(self.node)
    }
}

impl<V> Clone for Cursor<'_, V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Cursor<'_, V> {}

impl<V> PartialEq for Cursor<'_, V> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.header, other.header) && self.node == other.node
    }
}

impl<V> Eq for Cursor<'_, V> {}

impl<V> fmt::Debug for Cursor<'_, V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cursor").field(&self.get()).finish()
    }
}

/// A cursor over the elements of an [`RbTree`] that can erase elements.
pub struct CursorMut<'a, V, X, C, A>
where
    A: Allocator,
{
    tree: &'a mut RbTree<V, X, C, A>,
    node: Link<V>,
}

impl<'a, V, X, C, A> CursorMut<'a, V, X, C, A>
where
    A: Allocator,
{
    #[inline]
    pub(super) fn new(tree: &'a mut RbTree<V, X, C, A>, node: Link<V>) -> Self {
        CursorMut { tree, node }
    }

    /// The element under the cursor, or `None` at the end.
    #[inline]
    pub fn get(&self) -> Option<&V> {
        value_of(self.node)
    }

    /// Is the cursor at the end position?
    #[inline]
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    /// Move to the in-order successor.
    #[inline]
    pub fn move_next(&mut self) {
        self.node = step_next(&self.tree.header, self.node);
    }

    /// Move to the in-order predecessor.
    #[inline]
    pub fn move_prev(&mut self) {
        self.node = step_prev(&self.tree.header, self.node);
    }

    /// The element after the cursor, without moving.
    #[inline]
    pub fn peek_next(&self) -> Option<&V> {
        value_of(step_next(&self.tree.header, self.node))
    }

    /// The element before the cursor, without moving.
    #[inline]
    pub fn peek_prev(&self) -> Option<&V> {
        value_of(step_prev(&self.tree.header, self.node))
    }

    /// A detached handle to the cursor's position.
    #[inline]
    pub fn position(&self) -> Position<V> {
        Position::new(self.node)
    }

    /// Downgrade to a read-only cursor at the same position.
    #[inline]
    pub fn as_cursor(&self) -> Cursor<'_, V> {
        Cursor::new(&self.tree.header, self.node)
    }

    /// Erase the element under the cursor and return it, moving the cursor to
    /// the following element.
    ///
    /// At the end position this does nothing and returns `None`.
    pub fn remove_current(&mut self) -> Option<V> {
        let node = self.node?;
        // Safety: `node` is a live node of `self.tree`, and we exclusively
        // borrow the tree.
        unsafe {
            self.node = successor(node);
            Some(self.tree.unlink_and_take(node))
        }
    }
}

impl<V, X, C, A> fmt::Debug for CursorMut<'_, V, X, C, A>
where
    V: fmt::Debug,
    A: Allocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CursorMut").field(&self.get()).finish()
    }
}
