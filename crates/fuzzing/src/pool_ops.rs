//! Op-sequence testing for `PoolAllocator`.

use super::CountingAllocator;
use bincode::{Decode, Encode};
use mutatis::{mutators as m, DefaultMutate, Generate, Mutate};
use rbpool::{Allocator, PoolAllocator, SingleThreadedLock, ALIGN, MAX_BYTES};
use std::{alloc::Layout, collections::BTreeMap, ptr::NonNull};

/// The largest allocation size the generator produces. Comfortably above
/// `MAX_BYTES` so that both the pooled and the large-object paths are covered.
const MAX_GENERATED_SIZE: usize = 2 * MAX_BYTES;

/// The largest alignment the generator produces, as a power of two. Alignments
/// above `ALIGN` take the large-object path.
const MAX_GENERATED_ALIGN_LOG2: usize = 5;

/// A pool test operation.
#[derive(Clone, Debug, Mutate, Encode, Decode)]
pub enum PoolOp {
    Alloc { id: u32, size: u16, align_log2: u8 },
    Dealloc { id: u32 },
    Grow { id: u32, size: u16 },
    Shrink { id: u32, size: u16 },
}

impl PoolOp {
    fn id_mut(&mut self) -> &mut u32 {
        match self {
            PoolOp::Alloc { id, .. }
            | PoolOp::Dealloc { id }
            | PoolOp::Grow { id, .. }
            | PoolOp::Shrink { id, .. } => id,
        }
    }
}

fn gen_size(ctx: &mut mutatis::Context) -> u16 {
    ctx.rng().gen_index(MAX_GENERATED_SIZE + 1).unwrap() as u16
}

impl Generate<PoolOp> for PoolOpMutator {
    fn generate(&mut self, ctx: &mut mutatis::Context) -> mutatis::Result<PoolOp> {
        let choices: &[fn(&mut mutatis::Context) -> mutatis::Result<PoolOp>] = &[
            |ctx| {
                Ok(PoolOp::Alloc {
                    id: ctx.rng().gen_u32(),
                    size: gen_size(ctx),
                    align_log2: ctx.rng().gen_index(MAX_GENERATED_ALIGN_LOG2 + 1).unwrap() as u8,
                })
            },
            |ctx| {
                Ok(PoolOp::Dealloc {
                    id: ctx.rng().gen_u32(),
                })
            },
            |ctx| {
                Ok(PoolOp::Grow {
                    id: ctx.rng().gen_u32(),
                    size: gen_size(ctx),
                })
            },
            |ctx| {
                Ok(PoolOp::Shrink {
                    id: ctx.rng().gen_u32(),
                    size: gen_size(ctx),
                })
            },
        ];

        let f = ctx.rng().choose(choices).unwrap();
        f(ctx)
    }
}

/// A sequence of pool test operations to perform.
#[derive(Clone, Debug, Default, Encode, Decode)]
pub struct PoolOps {
    ops: Vec<PoolOp>,
}

impl DefaultMutate for PoolOps {
    type DefaultMutate = PoolOpsMutator;
}

#[derive(Default)]
pub struct PoolOpsMutator;

impl Mutate<PoolOps> for PoolOpsMutator {
    fn mutate(
        &mut self,
        c: &mut mutatis::Candidates<'_>,
        ops: &mut PoolOps,
    ) -> mutatis::Result<()> {
        // Completely random mutations on a single-element basis.
        m::default::<Vec<PoolOp>>().mutate(c, &mut ops.ops)?;

        fn alloc_positions_and_ids(ops: &PoolOps) -> impl Iterator<Item = (usize, u32)> + '_ {
            ops.ops.iter().enumerate().filter_map(|(i, op)| match op {
                PoolOp::Alloc { id, .. } => Some((i, *id)),
                _ => None,
            })
        }

        // Retarget an operation to an existing `id`.
        c.mutation(|ctx| {
            let num_allocs = alloc_positions_and_ids(ops).count();
            if let Some(alloc_index) = ctx.rng().gen_index(num_allocs) {
                let (_, new_id) = alloc_positions_and_ids(ops).nth(alloc_index).unwrap();
                let op_index = ctx.rng().gen_index(ops.ops.len()).unwrap();
                *ops.ops[op_index].id_mut() = new_id;
            }
            Ok(())
        })?;

        // Deallocate or resize an existing allocation, somewhere after it was
        // allocated.
        if !c.shrink() {
            c.mutation(|ctx| {
                let num_allocs = alloc_positions_and_ids(ops).count();
                if let Some(alloc_index) = ctx.rng().gen_index(num_allocs) {
                    let (op_index, id) = alloc_positions_and_ids(ops).nth(alloc_index).unwrap();
                    let size = gen_size(ctx);
                    let f = ctx
                        .rng()
                        .choose([
                            |id, _size| PoolOp::Dealloc { id },
                            |id, size| PoolOp::Grow { id, size },
                            |id, size| PoolOp::Shrink { id, size },
                        ])
                        .unwrap();
                    let new_op = f(id, size);
                    let new_index =
                        op_index + 1 + ctx.rng().gen_index(ops.ops.len() - op_index).unwrap();
                    ops.ops.insert(new_index, new_op);
                }
                Ok(())
            })?;
        }

        Ok(())
    }
}

impl PoolOps {
    /// Create a new `PoolOps` from the given test operations.
    pub fn new(ops: impl IntoIterator<Item = PoolOp>) -> Self {
        let ops = ops.into_iter().collect();
        PoolOps { ops }
    }

    /// Remove the last op, returning whether there was one.
    pub fn pop(&mut self) -> bool {
        self.ops.pop().is_some()
    }

    /// Run these test operations against a fresh pool over a counting system
    /// allocator, then check that dropping the pool returned every byte.
    pub fn run(&self, allocation_limit: usize) -> Result<(), String> {
        let system = CountingAllocator::new();
        {
            let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
            self.run_with_allocator(&pool, allocation_limit)?;
            log::debug!("pool stats after run: {:?}", pool.stats());
        }
        ensure!(
            system.live_bytes() == 0,
            "dropping the pool leaked {} bytes",
            system.live_bytes()
        );
        ensure!(
            system.allocations() == system.deallocations(),
            "{} system allocations but {} deallocations",
            system.allocations(),
            system.deallocations()
        );
        Ok(())
    }

    /// Run these test operations with the given pool and allocation limit.
    pub fn run_with_allocator<A>(
        &self,
        pool: &PoolAllocator<A, SingleThreadedLock>,
        allocation_limit: usize,
    ) -> Result<(), String>
    where
        A: Allocator,
    {
        log::debug!("========== Running pool operations ==========");

        let mut live = LiveMap::new(allocation_limit);

        for op in &self.ops {
            log::debug!("Running {op:?}");

            match *op {
                PoolOp::Alloc {
                    id,
                    size,
                    align_log2,
                } => {
                    let align = 1usize << (align_log2 as usize).min(MAX_GENERATED_ALIGN_LOG2);
                    let Ok(layout) = Layout::from_size_align(size as usize, align) else {
                        continue;
                    };
                    if let Some(old) = live.remove(id) {
                        old.check_and_free(id, pool)?;
                    }
                    if live.beyond_allocation_limit(layout.size()) {
                        continue;
                    }
                    let ptr = pool
                        .allocate(layout)
                        .map_err(|_| format!("allocating {layout:?} failed"))?;
                    live.insert_checked(id, ptr, layout)?;
                }

                PoolOp::Dealloc { id } => {
                    if let Some(old) = live.remove(id) {
                        old.check_and_free(id, pool)?;
                    }
                }

                PoolOp::Grow { id, size } | PoolOp::Shrink { id, size } => {
                    let growing = matches!(op, PoolOp::Grow { .. });
                    let Some(old) = live.remove(id) else {
                        continue;
                    };
                    let new_size = size as usize;
                    let fits = if growing {
                        new_size >= old.layout.size()
                            && !live.beyond_allocation_limit(new_size)
                    } else {
                        new_size <= old.layout.size()
                    };
                    if !fits {
                        live.insert(id, old);
                        continue;
                    }

                    old.check_contents(id)?;
                    let new_layout = Layout::from_size_align(new_size, old.layout.align())
                        .map_err(|e| format!("{e}"))?;
                    let result = unsafe {
                        if growing {
                            pool.grow(old.ptr.cast(), old.layout, new_layout)
                        } else {
                            pool.shrink(old.ptr.cast(), old.layout, new_layout)
                        }
                    };
                    let new_ptr = result.map_err(|_| format!("resizing id{id} failed"))?;

                    // The preserved prefix must still hold the old pattern.
                    let kept = old.layout.size().min(new_size);
                    let slice = unsafe { prefix(new_ptr, kept) };
                    ensure!(
                        slice.iter().all(|b| *b == fill_byte(id)),
                        "resizing id{id} did not preserve its contents"
                    );
                    live.insert_checked(id, new_ptr, new_layout)?;
                }
            }
        }

        // Finally, deallocate any remaining live allocations.
        for (id, alloc) in std::mem::take(&mut live.map) {
            alloc.check_and_free(id, pool)?;
        }

        Ok(())
    }
}

/// The byte pattern a live allocation is filled with. Never zero, and
/// different for neighboring ids, so that a free-list link written into the
/// wrong block shows up as corruption.
fn fill_byte(id: u32) -> u8 {
    (id % 251) as u8 + 1
}

/// The first `len` bytes of an allocation, which must be initialized.
unsafe fn prefix<'a>(ptr: NonNull<[u8]>, len: usize) -> &'a [u8] {
    debug_assert!(len <= ptr.len());
    std::slice::from_raw_parts(ptr.cast::<u8>().as_ptr(), len)
}

/// A currently-live allocation.
#[derive(Debug)]
struct LiveAlloc {
    /// Pointer and actual allocated length.
    ptr: NonNull<[u8]>,
    /// Requested layout at allocation time.
    layout: Layout,
}

impl LiveAlloc {
    fn check_contents(&self, id: u32) -> Result<(), String> {
        let slice = unsafe { prefix(self.ptr, self.layout.size()) };
        ensure!(
            slice.iter().all(|b| *b == fill_byte(id)),
            "live allocation id{id} was corrupted"
        );
        Ok(())
    }

    fn check_and_free<A>(
        self,
        id: u32,
        pool: &PoolAllocator<A, SingleThreadedLock>,
    ) -> Result<(), String>
    where
        A: Allocator,
    {
        self.check_contents(id)?;
        log::debug!("deallocating id{id} -> {self:?}");
        unsafe { pool.deallocate(self.ptr.cast(), self.layout) };
        Ok(())
    }
}

/// The set of currently-live allocations, keyed by ID.
struct LiveMap {
    map: BTreeMap<u32, LiveAlloc>,

    /// The total number of requested bytes currently allocated.
    total_allocated_bytes: usize,

    /// The total allocated bytes should never surpass this limit.
    allocation_limit: usize,
}

impl LiveMap {
    fn new(allocation_limit: usize) -> Self {
        LiveMap {
            map: BTreeMap::default(),
            total_allocated_bytes: 0,
            allocation_limit,
        }
    }

    fn beyond_allocation_limit(&self, size: usize) -> bool {
        self.total_allocated_bytes + size > self.allocation_limit
    }

    /// Check a fresh allocation's properties, fill it, and insert it.
    fn insert_checked(&mut self, id: u32, ptr: NonNull<[u8]>, layout: Layout) -> Result<(), String> {
        log::debug!(
            "new allocation: id{id} -> {{ address: {ptr:p}, size: {}, layout: {layout:?} }}",
            ptr.len(),
        );

        ensure!(
            layout.size() <= ptr.len(),
            "actual allocated size is less than expected layout size",
        );
        let addr = ptr.cast::<u8>().as_ptr() as usize;
        ensure!(
            addr % layout.align() == 0,
            "actual allocated alignment is less than expected layout alignment",
        );
        if layout.size() <= MAX_BYTES && layout.align() <= ALIGN {
            ensure!(
                ptr.len() == layout.size().max(1).next_multiple_of(ALIGN),
                "pooled block of {} bytes for a {} byte request",
                ptr.len(),
                layout.size()
            );
        }

        let end = addr + ptr.len();
        for (other_id, other) in &self.map {
            let other_start = other.ptr.cast::<u8>().as_ptr() as usize;
            let other_end = other_start + other.ptr.len();
            ensure!(
                end <= other_start || other_end <= addr || ptr.len() == 0 || other.ptr.len() == 0,
                "id{id} overlaps live allocation id{other_id}",
            );
        }

        unsafe {
            ptr.cast::<u8>().write_bytes(fill_byte(id), layout.size());
        }
        self.insert(id, LiveAlloc { ptr, layout });
        Ok(())
    }

    fn insert(&mut self, id: u32, alloc: LiveAlloc) {
        self.total_allocated_bytes += alloc.layout.size();
        assert!(self.total_allocated_bytes <= self.allocation_limit);
        let old = self.map.insert(id, alloc);
        assert!(
            old.is_none(),
            "should remove and deallocate old entries before adding new ones"
        );
    }

    fn remove(&mut self, id: u32) -> Option<LiveAlloc> {
        let alloc = self.map.remove(&id)?;
        self.total_allocated_bytes -= alloc.layout.size();
        Some(alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbpool::{
        construct::{self, ConstructError},
        AllocError, Lock, PoolStats, TypedAlloc,
    };
    use mutatis::check::{Check, CheckError, CheckFailure};
    use std::collections::HashSet;

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, ALIGN).unwrap()
    }

    #[test]
    fn run_pool_ops() {
        let _ = env_logger::try_init();

        let seed_corpus = [
            // Empty.
            PoolOps::default(),
            // Simple alloc/dealloc pair.
            PoolOps::new([
                PoolOp::Alloc {
                    id: 0,
                    size: 24,
                    align_log2: 3,
                },
                PoolOp::Dealloc { id: 0 },
            ]),
            // Large object.
            PoolOps::new([
                PoolOp::Alloc {
                    id: 0,
                    size: 1000,
                    align_log2: 3,
                },
                PoolOp::Dealloc { id: 0 },
            ]),
            // Reuse a freed block for a neighbor of the same class.
            PoolOps::new([
                PoolOp::Alloc {
                    id: 0,
                    size: 8,
                    align_log2: 0,
                },
                PoolOp::Alloc {
                    id: 1,
                    size: 8,
                    align_log2: 0,
                },
                PoolOp::Dealloc { id: 0 },
                PoolOp::Alloc {
                    id: 2,
                    size: 7,
                    align_log2: 0,
                },
            ]),
            // Grow out of the pool and shrink back into it.
            PoolOps::new([
                PoolOp::Alloc {
                    id: 0,
                    size: 500,
                    align_log2: 2,
                },
                PoolOp::Grow { id: 0, size: 700 },
                PoolOp::Shrink { id: 0, size: 3 },
            ]),
        ];

        match Check::new().iters(20_000).shrink_iters(1).run_with(
            m::default::<PoolOps>(),
            seed_corpus,
            |ops| {
                let megabyte = 1 << 20;
                ops.run(megabyte)
            },
        ) {
            Ok(()) => {}
            Err(CheckError::Failed(CheckFailure { value, message, .. })) => {
                panic!("test failure: {message}: {value:#?}")
            }
            Err(e) => panic!("check error: {e}"),
        }
    }

    #[test]
    fn freed_blocks_are_reused_without_new_chunks() {
        let _ = env_logger::try_init();
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        let first: Vec<_> = (0..100)
            .map(|_| pool.allocate(layout(24)).unwrap())
            .collect();
        let distinct: HashSet<_> = first.iter().map(|p| p.cast::<u8>()).collect();
        assert_eq!(distinct.len(), 100);

        let stats = pool.stats();
        let system_allocations = system.allocations();
        assert!(stats.chunks > 0);

        for p in &first {
            unsafe { pool.deallocate(p.cast(), layout(24)) };
        }
        assert!(pool.free_blocks(24) >= 100);

        let second: Vec<_> = (0..100)
            .map(|_| pool.allocate(layout(24)).unwrap())
            .collect();
        assert_eq!(pool.stats().chunks, stats.chunks);
        assert_eq!(system.allocations(), system_allocations);

        // Every block of the second batch came from the first one.
        for p in &second {
            assert!(distinct.contains(&p.cast::<u8>()));
            unsafe { pool.deallocate(p.cast(), layout(24)) };
        }
    }

    #[test]
    fn refill_hands_out_one_block_and_threads_the_rest() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        let p = pool.allocate(layout(24)).unwrap();
        assert_eq!(p.len(), 24);
        assert_eq!(pool.free_blocks(24), 19);
        assert_eq!(
            pool.stats(),
            PoolStats {
                chunks: 1,
                system_bytes: 2 * 20 * 24,
                refills: 1,
                scavenges: 0,
            }
        );
        assert_eq!(system.allocations(), 1);

        unsafe { pool.deallocate(p.cast(), layout(24)) };
        assert_eq!(pool.free_blocks(24), 20);
    }

    #[test]
    fn chunk_requests_grow_with_pool_size() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        // The first chunk holds exactly 40 blocks of 24 bytes: 20 for the
        // first refill and 20 for the second, from the leftover remainder.
        let blocks: Vec<_> = (0..40)
            .map(|_| pool.allocate(layout(24)).unwrap())
            .collect();
        assert_eq!(pool.stats().chunks, 1);
        assert_eq!(pool.stats().refills, 2);

        // The next refill needs a new chunk, padded by 1/16th of the pool's
        // size (rounded up to the alignment).
        let extra = pool.allocate(layout(24)).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.system_bytes, 960 + (960 + 64));

        for p in blocks.iter().chain(Some(&extra)) {
            unsafe { pool.deallocate(p.cast(), layout(24)) };
        }
    }

    #[test]
    fn large_and_over_aligned_requests_bypass_the_pool() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        let big = Layout::from_size_align(MAX_BYTES + 1, ALIGN).unwrap();
        let p = pool.allocate(big).unwrap();
        assert_eq!(system.allocations(), 1);
        assert_eq!(pool.stats().chunks, 0);
        unsafe { pool.deallocate(p.cast(), big) };
        assert_eq!(system.live_bytes(), 0);

        let aligned = Layout::from_size_align(64, 64).unwrap();
        let p = pool.allocate(aligned).unwrap();
        assert_eq!(p.cast::<u8>().as_ptr() as usize % 64, 0);
        assert_eq!(pool.stats().chunks, 0);
        unsafe { pool.deallocate(p.cast(), aligned) };
        assert_eq!(system.live_bytes(), 0);

        // The largest pooled size still goes through the pool.
        let p = pool.allocate(layout(MAX_BYTES)).unwrap();
        assert_eq!(pool.stats().chunks, 1);
        unsafe { pool.deallocate(p.cast(), layout(MAX_BYTES)) };
    }

    #[test]
    fn zero_sized_requests_use_the_smallest_class() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        let zero = Layout::from_size_align(0, 1).unwrap();
        let p = pool.allocate(zero).unwrap();
        assert_eq!(p.len(), ALIGN);
        unsafe { pool.deallocate(p.cast(), zero) };
        assert_eq!(pool.free_blocks(0), 20);
        assert_eq!(pool.free_blocks(ALIGN), 20);
    }

    #[test]
    fn salvage_scavenge_and_out_of_memory() {
        let _ = env_logger::try_init();
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        // Use up the first chunk of 512-byte blocks exactly.
        let mut big: Vec<_> = (0..40)
            .map(|_| pool.allocate(layout(512)).unwrap())
            .collect();
        assert_eq!(pool.stats().chunks, 1);
        assert_eq!(pool.free_blocks(512), 0);

        let spare = big.pop().unwrap();
        unsafe { pool.deallocate(spare.cast(), layout(512)) };
        assert_eq!(pool.free_blocks(512), 1);

        // With the system out of memory, the spare 512-byte block becomes the
        // new chunk remainder.
        system.set_failing(true);
        let small = pool.allocate(layout(8)).unwrap();
        assert_eq!(small.cast::<u8>(), spare.cast::<u8>());
        assert_eq!(pool.stats().scavenges, 1);
        assert_eq!(pool.stats().chunks, 1);
        assert_eq!(pool.free_blocks(512), 0);
        assert_eq!(pool.free_blocks(8), 19);

        // Nothing can serve another 512-byte block. The 352 bytes left in the
        // remainder are salvaged onto their own free list first.
        assert_eq!(pool.allocate(layout(512)), Err(AllocError));
        assert_eq!(pool.free_blocks(352), 1);
        let salvaged = pool.allocate(layout(352)).unwrap();
        assert_eq!(pool.free_blocks(352), 0);

        // Already-refilled classes keep working.
        let more_small = pool.allocate(layout(8)).unwrap();

        system.set_failing(false);
        unsafe {
            pool.deallocate(salvaged.cast(), layout(352));
            pool.deallocate(more_small.cast(), layout(8));
            pool.deallocate(small.cast(), layout(8));
            for p in big {
                pool.deallocate(p.cast(), layout(512));
            }
        }
        drop(pool);
        assert_eq!(system.live_bytes(), 0);
    }

    #[test]
    fn out_of_memory_on_empty_pool() {
        let system = CountingAllocator::new();
        system.set_failing(true);
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        assert_eq!(pool.allocate(layout(16)), Err(AllocError));
        assert_eq!(pool.stats(), PoolStats::default());

        system.set_failing(false);
        let p = pool.allocate(layout(16)).unwrap();
        unsafe { pool.deallocate(p.cast(), layout(16)) };
    }

    #[test]
    fn resizing_within_a_size_class_keeps_the_block() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());

        let p = pool.allocate(layout(10)).unwrap();
        unsafe { p.cast::<u8>().write_bytes(0x5a, 10) };

        let same = unsafe { pool.grow(p.cast(), layout(10), layout(16)) }.unwrap();
        assert_eq!(same.cast::<u8>(), p.cast::<u8>());
        assert_eq!(same.len(), 16);

        let moved = unsafe { pool.grow(same.cast(), layout(16), layout(17)) }.unwrap();
        assert_ne!(moved.cast::<u8>(), p.cast::<u8>());
        assert_eq!(moved.len(), 24);
        assert!(unsafe { prefix(moved, 10) }.iter().all(|b| *b == 0x5a));

        let shrunk = unsafe { pool.shrink(moved.cast(), layout(17), layout(3)) }.unwrap();
        assert_eq!(shrunk.len(), 8);
        assert!(unsafe { prefix(shrunk, 3) }.iter().all(|b| *b == 0x5a));

        let system_allocations = system.allocations();
        let large = unsafe { pool.grow(shrunk.cast(), layout(3), layout(600)) }.unwrap();
        assert_eq!(system.allocations(), system_allocations + 1);
        assert!(unsafe { prefix(large, 3) }.iter().all(|b| *b == 0x5a));
        unsafe { pool.deallocate(large.cast(), layout(600)) };
    }

    #[test]
    fn spin_locked_pool_is_shared_between_threads() {
        struct System;

        unsafe impl Allocator for System {
            fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
                assert_ne!(layout.size(), 0);
                let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) }).ok_or(AllocError)?;
                Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
            }

            unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
                std::alloc::dealloc(ptr.as_ptr(), layout);
            }
        }

        let pool = PoolAllocator::new(System, rbpool::SpinLock::new());
        std::thread::scope(|s| {
            for t in 0..4u8 {
                let pool = &pool;
                s.spawn(move || {
                    for round in 0..50 {
                        let size = 8 * (1 + (t as usize + round) % 16);
                        let blocks: Vec<_> = (0..30)
                            .map(|_| {
                                let p = pool.allocate(layout(size)).unwrap();
                                unsafe { p.cast::<u8>().write_bytes(t + 1, size) };
                                p
                            })
                            .collect();
                        for p in blocks {
                            let bytes = unsafe { prefix(p, size) };
                            assert!(bytes.iter().all(|b| *b == t + 1));
                            unsafe { pool.deallocate(p.cast(), layout(size)) };
                        }
                    }
                });
            }
        });

        let stats = pool.stats();
        assert!(stats.chunks > 0);
        assert!(stats.refills >= 4);
    }

    #[test]
    #[should_panic(expected = "pool lock is already held")]
    fn single_threaded_lock_refuses_reentry() {
        let lock = SingleThreadedLock::new();
        lock.lock();
        lock.unlock();
        lock.lock();
        lock.lock();
    }

    #[test]
    fn typed_alloc_translates_counts_to_bytes() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let typed = TypedAlloc::<u64, _>::new(&pool);

        let p = typed.allocate(3).unwrap();
        assert_eq!(pool.free_blocks(24), 19);
        unsafe {
            for i in 0..3 {
                construct::construct(p.add(i), i as u64 * 7);
            }
            assert_eq!(*p.add(2).as_ptr(), 14);
            construct::destroy_slice(p, 3);
            typed.deallocate(p, 3);
        }
        assert_eq!(pool.free_blocks(24), 20);

        // Zero elements never reach the pool.
        let empty = typed.allocate(0).unwrap();
        unsafe { typed.deallocate(empty, 0) };
        assert_eq!(pool.stats().refills, 1);

        assert!(typed.allocate(usize::MAX).is_err());
    }

    #[test]
    fn failed_construction_releases_the_block() {
        let system = CountingAllocator::new();
        let pool = PoolAllocator::new(&system, SingleThreadedLock::new());
        let typed = TypedAlloc::<[u8; 40], _>::new(&pool);

        let ok = construct::create_with(&typed, || Ok::<_, ()>([1; 40])).unwrap();
        let free_before = pool.free_blocks(40);

        let err = construct::create_with(&typed, || Err::<[u8; 40], _>("bad input"));
        assert_eq!(err, Err(ConstructError::Init("bad input")));
        assert_eq!(pool.free_blocks(40), free_before);

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = construct::create_with(&typed, || -> Result<[u8; 40], ()> {
                panic!("constructor panicked")
            });
        }));
        assert!(panicked.is_err());
        assert_eq!(pool.free_blocks(40), free_before);

        unsafe { construct::destroy_and_deallocate(&typed, ok) };
        assert_eq!(pool.free_blocks(40), free_before + 1);

        system.set_failing(true);
        let typed_big = TypedAlloc::<[u8; 1024], _>::new(&pool);
        assert_eq!(
            construct::create_with(&typed_big, || Ok::<_, ()>([0; 1024])),
            Err(ConstructError::Alloc(AllocError))
        );
    }
}
