use core::{marker::PhantomData, mem};

use super::*;

/// An adapter that allocates arrays of `T` from an untyped allocator `A`.
///
/// Element counts are translated into byte layouts with `Layout::array`, so
/// callers never compute sizes by hand. Requests for zero bytes (either
/// `n == 0` or a zero-sized `T`) never reach the underlying allocator.
pub struct TypedAlloc<T, A> {
    alloc: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T, A> TypedAlloc<T, A>
where
    A: Allocator,
{
    /// Create a new adapter over the given allocator.
    #[inline]
    pub const fn new(alloc: A) -> Self {
        TypedAlloc {
            alloc,
            _marker: PhantomData,
        }
    }

    /// Get a shared reference to the underlying allocator.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Unwrap the underlying allocator.
    #[inline]
    pub fn into_inner(self) -> A {
        self.alloc
    }

    /// Allocate uninitialized space for `n` values of type `T`.
    ///
    /// Fails with `AllocError` if the underlying allocator fails or if the
    /// total size overflows.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>, AllocError> {
        let layout = Layout::array::<T>(n).map_err(|_| AllocError)?;
        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }
        Ok(self.alloc.allocate(layout)?.cast())
    }

    /// Deallocate space for `n` values of type `T`.
    ///
    /// This does not drop the values; see [`construct::destroy_slice`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `self.allocate(n)` with the same `n`,
    /// and must not have been deallocated since.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, n: usize) {
        if n == 0 || mem::size_of::<T>() == 0 {
            return;
        }
        // Safety: `allocate(n)` succeeded with this same layout.
        let layout = Layout::from_size_align_unchecked(mem::size_of::<T>() * n, mem::align_of::<T>());
        self.alloc.deallocate(ptr.cast(), layout);
    }
}

impl<T, A> Clone for TypedAlloc<T, A>
where
    A: Clone,
{
    fn clone(&self) -> Self {
        TypedAlloc {
            alloc: self.alloc.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, A> core::fmt::Debug for TypedAlloc<T, A>
where
    A: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypedAlloc")
            .field("type", &core::any::type_name::<T>())
            .field("alloc", &self.alloc)
            .finish()
    }
}
