//! On-disk header for persisted indexes.
//!
//! The header occupies a fixed 64 bytes at the start of the file,
//! little-endian throughout:
//!
//! ```text
//! [0,  4)  magic "DHVR"
//! [4,  6)  format version (u16)
//! [6,  8)  vector dimension (u16)
//! [8,  12) vectors per block (u32)
//! [12, 16) block size in bytes (u32) = vectors_per_block * dim * 4
//! [16, 20) number of blocks (u32)
//! [20, 24) serialised tree length (u32)
//! [24, 32) routing table offset (u64)
//! [32, 40) block data offset (u64, 4 KiB aligned)
//! [40, 64) reserved, zero
//! ```

use crate::error::{IndexError, Result};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Identifies a valid canopy index file.
pub const MAGIC: [u8; 4] = *b"DHVR";

/// Current file format version. Readers refuse any other version.
pub const FORMAT_VERSION: u16 = 1;

/// Persisted index metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub dim: u16,
    pub vectors_per_block: u32,
    pub block_size_bytes: u32,
    pub num_blocks: u32,
    pub tree_len: u32,
    pub routing_offset: u64,
    pub data_offset: u64,
}

impl Header {
    /// Encode the header into its fixed 64-byte representation.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&self.dim.to_le_bytes());
        buf[8..12].copy_from_slice(&self.vectors_per_block.to_le_bytes());
        buf[12..16].copy_from_slice(&self.block_size_bytes.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.tree_len.to_le_bytes());
        buf[24..32].copy_from_slice(&self.routing_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.data_offset.to_le_bytes());
        buf
    }

    /// Decode and validate a header from the start of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_SIZE {
            return Err(IndexError::Truncated {
                needed: HEADER_SIZE,
                len: src.len(),
            });
        }
        if src[0..4] != MAGIC {
            return Err(IndexError::Format(format!(
                "invalid magic bytes {:02x?}",
                &src[0..4]
            )));
        }
        let version = u16::from_le_bytes([src[4], src[5]]);
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        Ok(Self {
            dim: u16::from_le_bytes([src[6], src[7]]),
            vectors_per_block: u32::from_le_bytes([src[8], src[9], src[10], src[11]]),
            block_size_bytes: u32::from_le_bytes([src[12], src[13], src[14], src[15]]),
            num_blocks: u32::from_le_bytes([src[16], src[17], src[18], src[19]]),
            tree_len: u32::from_le_bytes([src[20], src[21], src[22], src[23]]),
            routing_offset: u64::from_le_bytes(src[24..32].try_into().expect("8 bytes")),
            data_offset: u64::from_le_bytes(src[32..40].try_into().expect("8 bytes")),
        })
    }
}
