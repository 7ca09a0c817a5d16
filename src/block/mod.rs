//! Fixed-capacity vector blocks: the unit of storage and batched scoring.
//!
//! A block holds up to V vectors of [`DIM`] float32s in row-major layout
//! (`data[i*DIM..(i+1)*DIM]` is slot `i`). Three ownership variants share
//! one contract: heap-owned, off-heap-owned (C allocator), and a read-only
//! view into a shared file mapping. The variant determines whether writes
//! are legal and what dropping the block does.
//!
//! Slots are write-once: once a slot has been written it is never
//! overwritten, and leaves never reuse slots.

pub mod pool;

pub use pool::BlockPool;

use std::ptr::NonNull;
use std::sync::Arc;

use crate::simd;
use crate::store::MmapStore;
use crate::DIM;

/// A V×[`DIM`] float32 region.
pub enum Block {
    /// Heap-owned buffer; dropping frees it.
    Heap(Box<[f32]>),
    /// Buffer from the C allocator, outside the Rust heap; dropping frees it.
    OffHeap(OffHeapBuf),
    /// Borrowed read-only window into a shared file mapping; dropping is a
    /// no-op and writes are refused.
    Mmap(MmapView),
}

impl Block {
    /// The underlying V×[`DIM`] float slice. Empty for an mmap view whose
    /// backing range has become invalid.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        match self {
            Block::Heap(buf) => buf,
            Block::OffHeap(buf) => buf.as_slice(),
            Block::Mmap(view) => view.data(),
        }
    }

    /// Number of vector slots in this block.
    #[must_use]
    pub fn vectors_per_block(&self) -> usize {
        self.floats() / DIM
    }

    fn floats(&self) -> usize {
        match self {
            Block::Heap(buf) => buf.len(),
            Block::OffHeap(buf) => buf.floats(),
            Block::Mmap(view) => view.floats(),
        }
    }

    /// Write `vec` into `slot`. Returns `false` for an out-of-range slot, a
    /// wrong-length vector, or a read-only block.
    pub fn set_vector(&mut self, slot: usize, vec: &[f32]) -> bool {
        if vec.len() != DIM {
            return false;
        }
        let start = slot * DIM;
        let dst = match self {
            Block::Heap(buf) => &mut buf[..],
            Block::OffHeap(buf) => buf.as_mut_slice(),
            Block::Mmap(_) => return false,
        };
        let Some(dst) = dst.get_mut(start..start + DIM) else {
            return false;
        };
        dst.copy_from_slice(vec);
        true
    }

    /// Read the vector at `slot` into `dst`.
    pub fn get_vector(&self, slot: usize, dst: &mut [f32]) -> bool {
        if dst.len() != DIM {
            return false;
        }
        let start = slot * DIM;
        let Some(src) = self.data().get(start..start + DIM) else {
            return false;
        };
        dst.copy_from_slice(src);
        true
    }

    /// Dot products of `query` against the first `n` slots, written into
    /// `out[..n]`. Returns `false` on invalid input.
    pub fn dot_batch_into(&self, query: &[f32], n: usize, out: &mut [f64]) -> bool {
        simd::dot_batch_into(query, self.data(), n, out)
    }
}

/// Buffer obtained from the C allocator. Keeping block data out of the Rust
/// heap mirrors the off-heap mode of the original design; where the
/// allocator is unavailable the pool degrades to heap blocks silently.
pub struct OffHeapBuf {
    ptr: NonNull<f32>,
    floats: usize,
}

// The buffer is uniquely owned and only accessed through &self / &mut self.
unsafe impl Send for OffHeapBuf {}
unsafe impl Sync for OffHeapBuf {}

impl OffHeapBuf {
    /// Allocate a zeroed `floats`-long buffer. Returns `None` when the
    /// allocator is unavailable or refuses the request.
    #[cfg(unix)]
    pub fn alloc(floats: usize) -> Option<Self> {
        if floats == 0 {
            return None;
        }
        let ptr = unsafe { libc::calloc(floats, std::mem::size_of::<f32>()) };
        let ptr = NonNull::new(ptr.cast::<f32>())?;
        Some(Self { ptr, floats })
    }

    #[cfg(not(unix))]
    pub fn alloc(_floats: usize) -> Option<Self> {
        None
    }

    fn floats(&self) -> usize {
        self.floats
    }

    fn as_slice(&self) -> &[f32] {
        // calloc zero-fills, so every float is initialised from the start.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.floats) }
    }

    fn as_mut_slice(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.floats) }
    }
}

impl Drop for OffHeapBuf {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::free(self.ptr.as_ptr().cast());
        }
    }
}

/// Read-only f32 window into a shared [`MmapStore`]. The view keeps the
/// store alive, so a leaf built from a persisted file can never outlive its
/// mapping.
pub struct MmapView {
    store: Arc<MmapStore>,
    offset: usize,
    floats: usize,
}

impl MmapView {
    #[must_use]
    pub fn new(store: Arc<MmapStore>, offset: usize, floats: usize) -> Self {
        Self {
            store,
            offset,
            floats,
        }
    }

    fn floats(&self) -> usize {
        self.floats
    }

    fn data(&self) -> &[f32] {
        self.store
            .float_slice(self.offset, self.floats)
            .unwrap_or(&[])
    }
}
