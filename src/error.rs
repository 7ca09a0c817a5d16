//! Error types for canopy.

use thiserror::Error;

/// Errors surfaced by construction and persistence boundaries.
///
/// Hot-path operations (`add`, `search*`) deliberately return booleans or
/// possibly-empty result vectors instead; allocating an error per rejected
/// call would dominate their cost.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying file or system call failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid magic bytes, dimension mismatch, or other structural damage.
    #[error("format error: {0}")]
    Format(String),

    /// A required region extends past the end of the file.
    #[error("index file truncated: need {needed} bytes, have {len}")]
    Truncated { needed: usize, len: usize },

    /// The file was written by an incompatible format revision.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// A vector could not be re-inserted while rebuilding for append.
    #[error("append failed: {0}")]
    Append(String),
}

/// Result type alias for canopy operations.
pub type Result<T> = std::result::Result<T, IndexError>;
