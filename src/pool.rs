//! The size-class pool allocator.
//!
//! Small requests are segregated into `NUM_SIZE_CLASSES` size classes, each
//! `ALIGN` bytes apart, and served from one intrusive free list per class:
//!
//! 1. On allocation we round the requested size up to its class and pop the
//!    head of that class's free list.
//!
//! 2. On deallocation we push the block back onto the head of its class's free
//!    list. Blocks are never returned to the inner allocator individually.
//!
//! 3. When a free list is empty we *refill* it: we carve a batch of blocks out
//!    of the current chunk remainder, hand the first block to the caller, and
//!    thread the rest onto the free list.
//!
//! 4. When the chunk remainder cannot hold even one block, whatever is left of
//!    it is salvaged onto the free list for its own size, and a new chunk is
//!    requested from the inner allocator. Chunk requests grow with the total
//!    number of bytes the pool has ever obtained, so that a busy pool makes
//!    fewer and fewer requests over time.
//!
//! 5. If the inner allocator fails, we scavenge a free block from the free list
//!    of an equal or larger size class and use it as the new chunk remainder.
//!    Only when that also fails do we report `AllocError`.
//!
//! Requests larger than `MAX_BYTES`, or aligned more strictly than `ALIGN`,
//! bypass the pool entirely and go straight to the inner allocator.

use core::ptr;

use super::*;
use free_list::FreeList;

mod free_list;
mod lock;
pub use lock::{Lock, SingleThreadedLock, SpinLock};
use lock::Mutex;

/// The alignment granularity of the pool, and the distance between two
/// adjacent size classes.
///
/// Every pooled block is aligned to this many bytes.
pub const ALIGN: usize = 8;

/// The largest request size the pool serves itself. Larger requests go to the
/// inner allocator.
pub const MAX_BYTES: usize = 512;

/// The number of size classes, and therefore free lists.
pub const NUM_SIZE_CLASSES: usize = MAX_BYTES / ALIGN;

/// How many blocks a refill tries to carve at once.
const REFILL_BATCH: usize = 20;

/// New chunk requests are padded by the pool's total size shifted right by
/// this amount.
const GROWTH_SHIFT: u32 = 4;

/// Round `n` up to the next multiple of `ALIGN`.
#[inline]
const fn round_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// The index of the size class serving `n` bytes. Zero-sized requests share
/// the smallest class.
#[inline]
const fn class_index(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n + ALIGN - 1) / ALIGN - 1
    }
}

/// The block size of the class serving `n` bytes.
#[inline]
const fn class_size(n: usize) -> usize {
    (class_index(n) + 1) * ALIGN
}

/// Is this layout served by the pool, rather than the inner allocator?
#[inline]
fn is_pooled(layout: Layout) -> bool {
    layout.size() <= MAX_BYTES && layout.align() <= ALIGN
}

/// The intrusive header at the start of every chunk. Chunks form a singly
/// linked list so they can all be returned to the inner allocator on drop.
#[repr(C)]
struct ChunkHeader {
    next: Option<NonNull<ChunkHeader>>,
    /// The chunk's total size, header included.
    size: usize,
}

const CHUNK_HEADER_SIZE: usize = round_up(core::mem::size_of::<ChunkHeader>());

const CHUNK_ALIGN: usize = if core::mem::align_of::<ChunkHeader>() > ALIGN {
    core::mem::align_of::<ChunkHeader>()
} else {
    ALIGN
};

/// Counters describing how a pool has interacted with its inner allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// The number of chunks obtained from the inner allocator.
    pub chunks: usize,

    /// The total number of bytes ever obtained from the inner allocator for
    /// chunks, excluding chunk headers. This is the figure that drives chunk
    /// growth.
    pub system_bytes: usize,

    /// The number of times an empty free list was refilled.
    pub refills: usize,

    /// The number of times a free block was repurposed as the chunk remainder
    /// because the inner allocator failed.
    pub scavenges: usize,
}

/// A size-class segregated free-list allocator.
///
/// This allocator wraps an inner allocator of type `A`, from which it obtains
/// large chunks and which it uses directly for large-object requests.
///
/// Because this crate is `no_std` and does not assume the presence of an
/// operating system, you must provide your own locking mechanism via the `L`
/// type parameter. See the [`Lock`] trait for details.
///
/// Pooled memory is only returned to the inner allocator when the pool itself
/// is dropped.
pub struct PoolAllocator<A, L>
where
    A: Allocator,
    L: Lock,
{
    /// The underlying allocator.
    inner: A,

    /// Free lists and the chunk cursor.
    pool: Mutex<PoolState, L>,
}

struct PoolState {
    /// One free list per size class.
    free_lists: [FreeList; NUM_SIZE_CLASSES],

    /// The start of the unused remainder of the most recent chunk.
    start: *mut u8,

    /// The end of the unused remainder of the most recent chunk.
    end: *mut u8,

    /// Every chunk we have obtained from the inner allocator.
    chunks: Option<NonNull<ChunkHeader>>,

    stats: PoolStats,
}

// Safety: the raw pointers in `PoolState` point into chunks exclusively owned
// by this pool state, so moving the state to another thread moves that
// ownership along with it.
unsafe impl Send for PoolState {}

impl PoolState {
    const fn new() -> Self {
        PoolState {
            free_lists: [const { FreeList::new() }; NUM_SIZE_CLASSES],
            start: ptr::null_mut(),
            end: ptr::null_mut(),
            chunks: None,
            stats: PoolStats {
                chunks: 0,
                system_bytes: 0,
                refills: 0,
                scavenges: 0,
            },
        }
    }

    /// The number of bytes left in the current chunk remainder.
    #[inline]
    fn remaining(&self) -> usize {
        self.end as usize - self.start as usize
    }

    /// Carve `n` bytes off the front of the chunk remainder.
    ///
    /// ### Safety
    ///
    /// `n` must be non-zero and no larger than `self.remaining()`.
    #[inline]
    unsafe fn carve(&mut self, n: usize) -> NonNull<u8> {
        debug_assert!(n > 0 && n <= self.remaining());
        let block = self.start;
        self.start = self.start.add(n);
        NonNull::new_unchecked(block)
    }
}

impl<A, L> PoolAllocator<A, L>
where
    A: Allocator,
    L: Lock,
{
    /// Create a new `PoolAllocator` that obtains its chunks from the given
    /// `inner` allocator.
    #[inline]
    pub const fn new(inner: A, lock: L) -> Self {
        PoolAllocator {
            inner,
            pool: Mutex::new(PoolState::new(), lock),
        }
    }

    /// Get a shared reference to the inner allocator.
    #[inline]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Get an exclusive reference to the inner allocator.
    #[inline]
    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    /// Get a snapshot of this pool's counters.
    pub fn stats(&self) -> PoolStats {
        self.pool.lock().stats
    }

    /// The number of blocks currently in the free list of the size class that
    /// serves `size` bytes.
    ///
    /// Returns zero for sizes the pool does not serve.
    pub fn free_blocks(&self, size: usize) -> usize {
        if size > MAX_BYTES {
            return 0;
        }
        self.pool.lock().free_lists[class_index(size)].len()
    }

    /// Refill the free list for `size`-byte blocks, returning one block to the
    /// caller directly.
    ///
    /// `size` must already be rounded to its class size.
    fn refill(&self, pool: &mut PoolState, size: usize) -> Result<NonNull<u8>, AllocError> {
        let mut count = REFILL_BATCH;
        let chunk = self.chunk_alloc(pool, size, &mut count)?;
        pool.stats.refills += 1;

        let freelist = &mut pool.free_lists[class_index(size)];
        for i in (1..count).rev() {
            // Safety: `chunk` spans `count * size` bytes that no one else
            // references, and each block is `ALIGN`-aligned because the chunk
            // remainder always is and `size` is a multiple of `ALIGN`.
            unsafe {
                freelist.push(chunk.add(i * size));
            }
        }

        Ok(chunk)
    }

    /// Carve up to `*count` blocks of `size` bytes from the chunk remainder,
    /// obtaining a new chunk if necessary.
    ///
    /// On return, `*count` holds the number of blocks actually carved, which
    /// is at least one.
    fn chunk_alloc(
        &self,
        pool: &mut PoolState,
        size: usize,
        count: &mut usize,
    ) -> Result<NonNull<u8>, AllocError> {
        debug_assert_eq!(size % ALIGN, 0);
        debug_assert!(*count > 0);

        loop {
            let total = size * *count;
            let left = pool.remaining();

            if left >= total {
                // Safety: `total` is non-zero and fits in the remainder.
                return Ok(unsafe { pool.carve(total) });
            }

            if left >= size {
                *count = left / size;
                // Safety: at least one block fits in the remainder.
                return Ok(unsafe { pool.carve(*count * size) });
            }

            // The remainder cannot serve even one block. Salvage whatever is
            // left of it onto its own size class's free list.
            if left > 0 {
                debug_assert_eq!(left % ALIGN, 0);
                log::debug!("salvaging {left} byte chunk remainder at {:p}", pool.start);
                // Safety: the remainder is unused, aligned, and at least one
                // `ALIGN`-sized word long.
                unsafe {
                    let block = pool.carve(left);
                    pool.free_lists[class_index(left)].push(block);
                }
            }

            let bytes_to_get = 2 * total + round_up(pool.stats.system_bytes >> GROWTH_SHIFT);
            if self.request_chunk(pool, bytes_to_get).is_ok() {
                continue;
            }

            // The inner allocator failed. Try to repurpose a free block from
            // this size class or a larger one as the new remainder.
            log::debug!("chunk request of {bytes_to_get} bytes failed; scavenging free lists");
            let scavenged = (class_index(size)..NUM_SIZE_CLASSES).find_map(|index| {
                let block = pool.free_lists[index].pop()?;
                Some((block, (index + 1) * ALIGN))
            });
            match scavenged {
                Some((block, block_size)) => {
                    pool.stats.scavenges += 1;
                    pool.start = block.as_ptr();
                    // Safety: the block is `block_size` bytes long.
                    pool.end = unsafe { pool.start.add(block_size) };
                }
                None => {
                    pool.start = ptr::null_mut();
                    pool.end = ptr::null_mut();
                    log::warn!("pool out of memory serving {size} byte blocks");
                    return Err(AllocError);
                }
            }
        }
    }

    /// Obtain a new chunk with `bytes` usable bytes from the inner allocator
    /// and make it the chunk remainder.
    fn request_chunk(&self, pool: &mut PoolState, bytes: usize) -> Result<(), AllocError> {
        let chunk_size = bytes.checked_add(CHUNK_HEADER_SIZE).ok_or(AllocError)?;
        let layout = Layout::from_size_align(chunk_size, CHUNK_ALIGN).map_err(|_| AllocError)?;
        let chunk = self.inner.allocate(layout)?.cast::<u8>();

        log::debug!(
            "obtained {bytes} byte chunk at {chunk:p} (pool size {} bytes)",
            pool.stats.system_bytes
        );

        // Safety: the chunk is freshly allocated with room for a header at
        // `CHUNK_ALIGN` alignment.
        unsafe {
            chunk.cast::<ChunkHeader>().write(ChunkHeader {
                next: pool.chunks,
                size: chunk_size,
            });
            pool.chunks = Some(chunk.cast());
            pool.start = chunk.as_ptr().add(CHUNK_HEADER_SIZE);
            pool.end = pool.start.add(bytes);
        }

        pool.stats.chunks += 1;
        pool.stats.system_bytes += bytes;
        Ok(())
    }

    /// If `old` and `new` are both served by the same size class, the block can
    /// be reused as-is.
    #[inline]
    fn resize_in_place(ptr: NonNull<u8>, old: Layout, new: Layout) -> Option<NonNull<[u8]>> {
        if is_pooled(old) && is_pooled(new) && class_index(old.size()) == class_index(new.size())
        {
            Some(NonNull::slice_from_raw_parts(ptr, class_size(new.size())))
        } else {
            None
        }
    }

    /// Move a block to a freshly allocated one, copying `copy` bytes.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
        copy: usize,
    ) -> Result<NonNull<[u8]>, AllocError> {
        let new_ptr = self.allocate(new)?;
        ptr::copy_nonoverlapping(ptr.as_ptr().cast_const(), new_ptr.cast::<u8>().as_ptr(), copy);
        self.deallocate(ptr, old);
        Ok(new_ptr)
    }
}

impl<A, L> Drop for PoolAllocator<A, L>
where
    A: Allocator,
    L: Lock,
{
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        let mut next = pool.chunks.take();
        while let Some(chunk) = next {
            // Safety: every chunk in the list was allocated from `self.inner`
            // with this header written at its start, and no block carved from
            // it can outlive the pool.
            unsafe {
                let ChunkHeader { next: rest, size } = chunk.as_ptr().read();
                next = rest;
                let layout = Layout::from_size_align_unchecked(size, CHUNK_ALIGN);
                self.inner.deallocate(chunk.cast(), layout);
            }
        }
    }
}

unsafe impl<A, L> Allocator for PoolAllocator<A, L>
where
    A: Allocator,
    L: Lock,
{
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if !is_pooled(layout) {
            return self.inner.allocate(layout);
        }

        let size = class_size(layout.size());
        let mut pool = self.pool.lock();
        let pool = &mut *pool;

        let block = match pool.free_lists[class_index(size)].pop() {
            Some(block) => block,
            None => self.refill(pool, size)?,
        };

        debug_assert_eq!(block.as_ptr() as usize % ALIGN, 0);
        Ok(NonNull::slice_from_raw_parts(block, size))
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if !is_pooled(layout) {
            self.inner.deallocate(ptr, layout);
            return;
        }

        let mut pool = self.pool.lock();
        pool.free_lists[class_index(layout.size())].push(ptr);
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() >= old_layout.size());

        if let Some(block) = Self::resize_in_place(ptr, old_layout, new_layout) {
            return Ok(block);
        }
        if !is_pooled(old_layout) && !is_pooled(new_layout) {
            return self.inner.grow(ptr, old_layout, new_layout);
        }
        self.reallocate(ptr, old_layout, new_layout, old_layout.size())
    }

    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        debug_assert!(new_layout.size() <= old_layout.size());

        if let Some(block) = Self::resize_in_place(ptr, old_layout, new_layout) {
            return Ok(block);
        }
        if !is_pooled(old_layout) && !is_pooled(new_layout) {
            return self.inner.shrink(ptr, old_layout, new_layout);
        }
        self.reallocate(ptr, old_layout, new_layout, new_layout.size())
    }
}
