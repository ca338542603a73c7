#![doc = include_str!("../README.md")]
#![no_std]
#![deny(missing_docs)]
#![cfg_attr(feature = "allocator_api", feature(allocator_api))]

use cfg_if::cfg_if;
use core::{alloc::Layout, ptr::NonNull};

pub mod construct;
mod pool;
pub mod rb_tree;
mod typed;

pub use pool::{
    Lock, PoolAllocator, PoolStats, SingleThreadedLock, SpinLock, ALIGN, MAX_BYTES,
    NUM_SIZE_CLASSES,
};
pub use rb_tree::RbTree;
pub use typed::TypedAlloc;

cfg_if! {
    if #[cfg(feature = "allocator_api")] {
        pub use core::alloc::{AllocError, Allocator};
    } else if #[cfg(feature = "allocator_api2")] {
        pub use allocator_api2::alloc::{AllocError, Allocator};
    } else {
        compile_error!("Must enable one of the `allocator_api` or `allocator_api2` cargo features");
    }
}
