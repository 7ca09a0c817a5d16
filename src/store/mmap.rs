//! Read-only memory-mapped view of a persisted index file.
//!
//! The store hands out typed `&[f32]` slices by file offset; leaves built
//! from a persisted file score those slices in place, without copying.
//! Alignment is guaranteed by construction: the block data region starts at
//! a 4 KiB boundary and every block is a whole number of f32s, but the cast
//! is still checked so a corrupt file degrades to empty reads instead of
//! unaligned access.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::Result;

/// Read-only byte view of a persisted index file.
pub struct MmapStore {
    map: Mmap,
}

impl MmapStore {
    /// Open and map `path` read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // The file must not be truncated while mapped; canopy only replaces
        // index files via rename, which leaves existing mappings intact.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map })
    }

    /// The full mapped file.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Mapped file length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// A `floats`-long f32 view starting at byte `offset`, or `None` when
    /// the range leaves the file or is misaligned.
    #[must_use]
    pub fn float_slice(&self, offset: usize, floats: usize) -> Option<&[f32]> {
        let len = floats.checked_mul(4)?;
        let end = offset.checked_add(len)?;
        let bytes = self.map.get(offset..end)?;
        bytemuck::try_cast_slice(bytes).ok()
    }
}
