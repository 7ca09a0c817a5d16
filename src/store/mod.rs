//! Persisted index file primitives: the fixed header codec and the
//! read-only memory-mapped byte store.

pub mod format;
pub mod mmap;

pub use format::{Header, FORMAT_VERSION, HEADER_SIZE, MAGIC};
pub use mmap::MmapStore;
