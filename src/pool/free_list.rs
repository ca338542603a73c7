//! Intrusive free lists, threaded through the free blocks' own memory.

use core::ptr::{self, NonNull};

/// The view of a free block: its first word links to the next free block of
/// the same size class. Once a block is handed out, the caller owns all of its
/// bytes, link word included.
#[repr(C)]
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// A LIFO list of same-sized free blocks.
#[derive(Debug)]
pub(super) struct FreeList {
    head: Option<NonNull<FreeBlock>>,
    len: usize,
}

impl FreeList {
    pub(super) const fn new() -> Self {
        FreeList { head: None, len: 0 }
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    /// Push a block onto the head of the list.
    ///
    /// ### Safety
    ///
    /// * `block` must be valid for writes of a pointer and aligned to
    ///   `ALIGN`.
    ///
    /// * The block must not currently be in any free list or be live.
    pub(super) unsafe fn push(&mut self, block: NonNull<u8>) {
        let block = block.cast::<FreeBlock>();
        ptr::write(block.as_ptr(), FreeBlock { next: self.head });
        self.head = Some(block);
        self.len += 1;
    }

    /// Pop the head block, if any.
    pub(super) fn pop(&mut self) -> Option<NonNull<u8>> {
        let block = self.head?;
        // Safety: every block in this list was written by `push` and has not
        // been handed out since, so its link word is initialized.
        self.head = unsafe { ptr::read(block.as_ptr()).next };
        self.len -= 1;
        Some(block.cast())
    }
}
