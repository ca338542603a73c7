//! Shared fuzzing and testing infrastructure for `rbpool`.

use rbpool::{AllocError, Allocator};
use std::{alloc::Layout, cell::Cell, ptr::NonNull};

macro_rules! ensure {
    ( $cond:expr , $msg:expr $( , $args:expr )* $(,)? ) => {{
        let cond = $cond;
        if !cond {
            let msg = format!($msg $( , $args )* );
            let str_cond = stringify!($cond);
            return Err(format!("check failed: `{str_cond}`: {msg}"));
        }
    }};
}

pub mod encoding;
mod pool_ops;
mod tree_ops;

pub use pool_ops::{PoolOp, PoolOps};
pub use tree_ops::{TreeOp, TreeOps};

/// An instrumented system allocator.
///
/// Counts every call that reaches the system allocator, tracks how many bytes
/// are currently outstanding, and can be switched into a failing mode to
/// simulate the system running out of memory.
#[derive(Debug, Default)]
pub struct CountingAllocator {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes: Cell<usize>,
    failing: Cell<bool>,
}

impl CountingAllocator {
    /// Create a new counting allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    /// The number of deallocations so far.
    pub fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    /// The number of bytes allocated and not yet deallocated.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }

    /// While failing, every allocation request returns `AllocError`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if self.failing.get() {
            log::trace!("CountingAllocator: refusing {layout:?}");
            return Err(AllocError);
        }

        let ptr = if layout.size() == 0 {
            layout.align() as *mut u8
        } else {
            unsafe { std::alloc::alloc(layout) }
        };
        let ptr = NonNull::new(ptr).ok_or(AllocError)?;

        self.allocations.set(self.allocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get() + layout.size());
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.set(self.deallocations.get() + 1);
        self.live_bytes.set(self.live_bytes.get() - layout.size());
        if layout.size() != 0 {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// A small deterministic PRNG for tests that want long op sequences without
/// going through the mutator.
#[derive(Clone, Debug)]
pub struct XorShift(u64);

impl XorShift {
    /// Create a new generator from a non-zero seed.
    pub fn new(seed: u64) -> Self {
        XorShift(seed | 1)
    }

    /// The next pseudo-random value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// A pseudo-random value in `0..n`.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}
