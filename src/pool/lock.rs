//! Locking for the pool's free lists and chunk cursor.
//!
//! The pool state is owned by each `PoolAllocator` instance rather than being
//! process-wide, and the `L: Lock` type parameter decides whether that instance
//! may be shared between threads. This keeps the crate `no_std` while letting
//! the caller pick between a zero-cost single-threaded cell and a spin lock.

use core::{
    cell::{Cell, UnsafeCell},
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// A trait for providing mutual exclusion over a pool's state.
///
/// If you only use the pool allocator, and the trees allocating from it, on a
/// single thread, use [`SingleThreadedLock`]. To share one pool between
/// threads, use [`SpinLock`] or your own platform lock.
///
/// # Safety
///
/// * If the implementation type is `Sync`, then a pool using this lock will be
///   `Sync`, and therefore this trait must provide actual mutual exclusion.
///
/// * Even in single-threaded contexts this type must refuse re-entrant
///   locking. Refusal may be a panic, abort, infinite loop, or similar, but
///   locking must not succeed while the lock is already held.
pub unsafe trait Lock {
    /// Acquire the lock.
    fn lock(&self);

    /// Release the lock.
    fn unlock(&self);
}

/// A single-threaded implementation of [`Lock`].
///
/// This is effectively a `RefCell` flag: it panics on re-entrant locking and
/// makes the owning pool `!Sync`.
#[derive(Debug)]
pub struct SingleThreadedLock {
    locked: Cell<bool>,
}

unsafe impl Lock for SingleThreadedLock {
    #[inline]
    fn lock(&self) {
        assert!(!self.locked.get(), "pool lock is already held");
        self.locked.set(true);
    }

    #[inline]
    fn unlock(&self) {
        assert!(self.locked.get());
        self.locked.set(false);
    }
}

impl Default for SingleThreadedLock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl SingleThreadedLock {
    /// Construct a new, unlocked `SingleThreadedLock`.
    #[inline]
    pub const fn new() -> Self {
        SingleThreadedLock {
            locked: Cell::new(false),
        }
    }
}

/// A busy-waiting implementation of [`Lock`] that can be shared between
/// threads.
///
/// Pool critical sections are short (a free-list pop or push, occasionally a
/// chunk request), so spinning is acceptable for moderate contention. Give
/// each thread its own pool if contention is high.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Construct a new, unlocked `SpinLock`.
    #[inline]
    pub const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }
}

unsafe impl Lock for SpinLock {
    #[inline]
    fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    #[inline]
    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

pub(super) struct Mutex<T, L> {
    lock: L,
    value: UnsafeCell<T>,
}

// Safety: if `T` and `L` can be sent between threads, then the mutex can as
// well. Nothing here permits unsynchronized access after a move.
unsafe impl<T, L> Send for Mutex<T, L>
where
    T: Send,
    L: Send,
{
}

// Safety: upheld by the `Lock` trait's implementation contract.
//
// `T` must be `Send` because locking from another thread yields `&mut T`,
// which could be used to `mem::replace()` the value across threads.
unsafe impl<T, L> Sync for Mutex<T, L>
where
    T: Send,
    L: Sync + Lock,
{
}

impl<T, L> Mutex<T, L>
where
    L: Lock,
{
    pub(super) const fn new(value: T, lock: L) -> Self {
        let value = UnsafeCell::new(value);
        Mutex { lock, value }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, T, L> {
        self.lock.lock();
        MutexGuard { mutex: self }
    }

    /// Access the value without locking; `&mut self` already proves
    /// exclusivity.
    pub(super) fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

pub(super) struct MutexGuard<'a, T, L>
where
    L: Lock,
{
    mutex: &'a Mutex<T, L>,
}

impl<T, L> Drop for MutexGuard<'_, T, L>
where
    L: Lock,
{
    fn drop(&mut self) {
        self.mutex.lock.unlock();
    }
}

impl<T, L> Deref for MutexGuard<'_, T, L>
where
    L: Lock,
{
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, L> DerefMut for MutexGuard<'_, T, L>
where
    L: Lock,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.value.get() }
    }
}
