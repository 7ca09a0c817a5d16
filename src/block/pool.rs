//! Block allocation for a tree.
//!
//! The pool decides where block memory comes from (heap or the C allocator)
//! and keeps an allocation count for observability. Blocks themselves are
//! owned by the leaf that requested them, so dropping a tree releases every
//! block in one ownership cascade without per-block reference counting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::block::{Block, OffHeapBuf};
use crate::DIM;

/// Allocates blocks for one tree.
pub struct BlockPool {
    vectors_per_block: usize,
    use_offheap: bool,
    allocated: AtomicUsize,
    offheap_warned: AtomicBool,
}

impl BlockPool {
    #[must_use]
    pub fn new(vectors_per_block: usize, use_offheap: bool) -> Self {
        Self {
            vectors_per_block,
            use_offheap,
            allocated: AtomicUsize::new(0),
            offheap_warned: AtomicBool::new(false),
        }
    }

    /// Allocate a fresh zeroed block. Off-heap allocation failures degrade
    /// silently to heap blocks.
    pub fn alloc_block(&self) -> Block {
        let floats = self.vectors_per_block * DIM;
        if self.use_offheap {
            if let Some(buf) = OffHeapBuf::alloc(floats) {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                return Block::OffHeap(buf);
            }
            if !self.offheap_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!("off-heap allocator unavailable, using heap blocks");
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Block::Heap(vec![0.0_f32; floats].into_boxed_slice())
    }

    /// Number of blocks handed out so far.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn vectors_per_block(&self) -> usize {
        self.vectors_per_block
    }
}
