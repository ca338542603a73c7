//! Key extraction and strict weak orderings.

use core::cmp::Ordering;

/// Maps a stored value to the key it is ordered by.
///
/// Implementations are stateless: the tree only ever names the extractor as a
/// type parameter.
pub trait KeyOfValue<V> {
    /// The key type.
    type Key: ?Sized;

    /// Borrow the key of `value`.
    fn key(value: &V) -> &Self::Key;
}

/// The key of a value is the value itself, as in an ordered set.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<V> KeyOfValue<V> for Identity {
    type Key = V;

    #[inline]
    fn key(value: &V) -> &V {
        value
    }
}

/// The key of a pair is its first element, as in an ordered map.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectFirst;

impl<K, T> KeyOfValue<(K, T)> for SelectFirst {
    type Key = K;

    #[inline]
    fn key(value: &(K, T)) -> &K {
        &value.0
    }
}

/// A strict weak ordering over keys.
///
/// The tree only ever asks "is `a` less than `b`?". Two keys are equivalent
/// when neither is less than the other; `==` is never consulted.
pub trait Compare<K: ?Sized> {
    /// Is `a` ordered strictly before `b`?
    fn less(&self, a: &K, b: &K) -> bool;

    /// Are `a` and `b` equivalent under this ordering?
    #[inline]
    fn equivalent(&self, a: &K, b: &K) -> bool {
        !self.less(a, b) && !self.less(b, a)
    }
}

/// Ascending order by `Ord`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Less;

impl<K> Compare<K> for Less
where
    K: Ord + ?Sized,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a.cmp(b) == Ordering::Less
    }
}

/// Descending order by `Ord`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Greater;

impl<K> Compare<K> for Greater
where
    K: Ord + ?Sized,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a.cmp(b) == Ordering::Greater
    }
}

impl<K, F> Compare<K> for F
where
    K: ?Sized,
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}
