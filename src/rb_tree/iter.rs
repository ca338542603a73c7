use core::{fmt, iter::FusedIterator, marker::PhantomData};

use super::node::{predecessor, successor, Link};
use super::*;

/// An in-order iterator over the elements of an [`RbTree`].
pub struct Iter<'a, V> {
    front: Link<V>,
    back: Link<V>,
    remaining: usize,
    _marker: PhantomData<&'a V>,
}

impl<'a, V> Iter<'a, V> {
    #[inline]
    pub(super) fn new(front: Link<V>, back: Link<V>, remaining: usize) -> Self {
        Iter {
            front,
            back,
            remaining,
            _marker: PhantomData,
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.front?;
        self.remaining -= 1;
        // Safety: the iterator borrows the tree, and `remaining` keeps us
        // within the live nodes between `front` and `back`.
        unsafe {
            self.front = successor(node);
            Some(&(*node.as_ptr()).value)
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, V> DoubleEndedIterator for Iter<'a, V> {
    fn next_back(&mut self) -> Option<&'a V> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.back?;
        self.remaining -= 1;
        // Safety: as in `next`.
        unsafe {
            self.back = predecessor(node);
            Some(&(*node.as_ptr()).value)
        }
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}

impl<V> FusedIterator for Iter<'_, V> {}

impl<V> Clone for Iter<'_, V> {
    fn clone(&self) -> Self {
        Iter::new(self.front, self.back, self.remaining)
    }
}

impl<V> fmt::Debug for Iter<'_, V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

/// An in-order iterator over a half-open span of positions, as returned by
/// [`RbTree::equal_range_iter`].
pub struct Range<'a, V> {
    front: Link<V>,
    end: Link<V>,
    _marker: PhantomData<&'a V>,
}

impl<'a, V> Range<'a, V> {
    #[inline]
    pub(super) fn new(front: Link<V>, end: Link<V>) -> Self {
        Range {
            front,
            end,
            _marker: PhantomData,
        }
    }
}

impl<'a, V> Iterator for Range<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        if self.front == self.end {
            return None;
        }
        let node = self.front?;
        // Safety: `end` is reachable from `front` by successor steps within a
        // borrowed tree.
        unsafe {
            self.front = successor(node);
            Some(&(*node.as_ptr()).value)
        }
    }
}

impl<V> FusedIterator for Range<'_, V> {}

/// An owning in-order iterator over the elements of an [`RbTree`].
pub struct IntoIter<V, X, C, A>
where
    A: Allocator,
{
    tree: RbTree<V, X, C, A>,
}

impl<V, X, C, A> IntoIter<V, X, C, A>
where
    A: Allocator,
{
    #[inline]
    pub(super) fn new(tree: RbTree<V, X, C, A>) -> Self {
        IntoIter { tree }
    }
}

impl<V, X, C, A> Iterator for IntoIter<V, X, C, A>
where
    A: Allocator,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let node = self.tree.header.leftmost?;
        // Safety: `leftmost` is a live node of the tree we own.
        Some(unsafe { self.tree.unlink_and_take(node) })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.tree.len(), Some(self.tree.len()))
    }
}

impl<V, X, C, A> DoubleEndedIterator for IntoIter<V, X, C, A>
where
    A: Allocator,
{
    fn next_back(&mut self) -> Option<V> {
        let node = self.tree.header.rightmost?;
        // Safety: as in `next`.
        Some(unsafe { self.tree.unlink_and_take(node) })
    }
}

impl<V, X, C, A> ExactSizeIterator for IntoIter<V, X, C, A> where A: Allocator {}

impl<V, X, C, A> FusedIterator for IntoIter<V, X, C, A> where A: Allocator {}
