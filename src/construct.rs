//! Placing values into, and dropping values out of, raw allocator memory.

use core::{fmt, mem, ptr};

use super::*;

/// Move `value` into the uninitialized memory at `p`.
///
/// # Safety
///
/// `p` must be valid for writes and properly aligned. Any value previously at
/// `p` is overwritten without being dropped.
#[inline]
pub unsafe fn construct<T>(p: NonNull<T>, value: T) {
    p.as_ptr().write(value);
}

/// Drop the value at `p` in place, leaving the memory uninitialized.
///
/// # Safety
///
/// `p` must point to a valid, initialized `T` that is not used again until it
/// is re-initialized.
#[inline]
pub unsafe fn destroy<T>(p: NonNull<T>) {
    ptr::drop_in_place(p.as_ptr());
}

/// Drop `len` consecutive values starting at `p`.
///
/// Does nothing at all for types without drop glue.
///
/// # Safety
///
/// Same as [`destroy`], for each of the `len` values.
#[inline]
pub unsafe fn destroy_slice<T>(p: NonNull<T>, len: usize) {
    if mem::needs_drop::<T>() {
        ptr::drop_in_place(ptr::slice_from_raw_parts_mut(p.as_ptr(), len));
    }
}

/// An error from [`create_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstructError<E> {
    /// The allocator could not provide memory for the value.
    Alloc(AllocError),
    /// The initializer failed; the raw memory has already been released.
    Init(E),
}

impl<E> fmt::Display for ConstructError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructError::Alloc(_) => f.write_str("memory allocation failed"),
            ConstructError::Init(e) => write!(f, "failed to construct value: {e}"),
        }
    }
}

impl ConstructError<core::convert::Infallible> {
    /// Recover the allocation error from a construction that cannot fail to
    /// initialize.
    #[inline]
    pub fn into_alloc_error(self) -> AllocError {
        match self {
            ConstructError::Alloc(e) => e,
            ConstructError::Init(never) => match never {},
        }
    }
}

/// Releases a single raw allocation on drop unless disarmed.
struct RawGuard<'a, T, A>
where
    A: Allocator,
{
    alloc: &'a TypedAlloc<T, A>,
    ptr: NonNull<T>,
}

impl<T, A> Drop for RawGuard<'_, T, A>
where
    A: Allocator,
{
    fn drop(&mut self) {
        // Safety: the guard is only armed between a successful `allocate(1)`
        // and the value being written.
        unsafe { self.alloc.deallocate(self.ptr, 1) }
    }
}

/// Allocate space for one `T` and initialize it with `init`.
///
/// If `init` returns an error, or panics, the raw memory is handed back to the
/// allocator before the error (or panic) propagates, so a failed construction
/// never leaks.
pub fn create_with<T, A, E>(
    alloc: &TypedAlloc<T, A>,
    init: impl FnOnce() -> Result<T, E>,
) -> Result<NonNull<T>, ConstructError<E>>
where
    A: Allocator,
{
    let ptr = alloc.allocate(1).map_err(ConstructError::Alloc)?;
    let guard = RawGuard { alloc, ptr };
    let value = init().map_err(ConstructError::Init)?;
    mem::forget(guard);
    // Safety: `ptr` is freshly allocated for exactly one `T`.
    unsafe { construct(ptr, value) };
    Ok(ptr)
}

/// Drop the value at `p` and return its memory to `alloc`.
///
/// # Safety
///
/// `p` must have been returned by [`create_with`] with the same allocator and
/// must not be used again.
pub unsafe fn destroy_and_deallocate<T, A>(alloc: &TypedAlloc<T, A>, p: NonNull<T>)
where
    A: Allocator,
{
    destroy(p);
    alloc.deallocate(p, 1);
}
