//! Index configuration.

use std::path::PathBuf;

pub(crate) const DEFAULT_VECTORS_PER_BLOCK: usize = 64;
pub(crate) const DEFAULT_SPLIT_THRESHOLD: usize = 512;
pub(crate) const DEFAULT_SEARCH_WIDTH: usize = 3;
pub(crate) const DEFAULT_PRUNE_EPSILON: f64 = 0.1;

/// Tuning parameters for a [`crate::Tree`].
///
/// All numeric fields are normalised on tree construction: zero falls back
/// to the default, a negative `prune_epsilon` is clamped to the default, and
/// `split_threshold` is raised to `vectors_per_block` when smaller.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Vectors per block; also the batched dot-product inner dimension.
    pub vectors_per_block: usize,
    /// Leaf capacity. A leaf reaching this count is frozen and split.
    pub split_threshold: usize,
    /// Maximum children visited per internal during multi-path search.
    pub search_width: usize,
    /// Children scoring within this margin of the best child are eligible
    /// for descent (at most `search_width` of them are visited).
    pub prune_epsilon: f64,
    /// Allocate blocks from the C allocator instead of the Rust heap.
    /// Falls back to heap allocation silently where unavailable.
    pub use_offheap: bool,
    /// When set and the file exists, the tree opens read-only from it.
    pub persist_path: Option<PathBuf>,
    /// When non-zero, single-tree queries are funnelled through a worker
    /// pool of this size to cap concurrent mmap faults.
    pub search_pool_workers: usize,
    /// Seed for the split RNG. Splits are deterministic for a fixed seed
    /// and insertion sequence; defaults to an entropy-derived seed.
    pub split_seed: Option<u64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            vectors_per_block: DEFAULT_VECTORS_PER_BLOCK,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            search_width: DEFAULT_SEARCH_WIDTH,
            prune_epsilon: DEFAULT_PRUNE_EPSILON,
            use_offheap: false,
            persist_path: None,
            search_pool_workers: 0,
            split_seed: None,
        }
    }
}

impl TreeConfig {
    /// Replace out-of-range values with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.vectors_per_block == 0 {
            self.vectors_per_block = DEFAULT_VECTORS_PER_BLOCK;
        }
        if self.split_threshold == 0 {
            self.split_threshold = DEFAULT_SPLIT_THRESHOLD;
        }
        if self.split_threshold < self.vectors_per_block {
            self.split_threshold = self.vectors_per_block;
        }
        if self.search_width == 0 {
            self.search_width = DEFAULT_SEARCH_WIDTH;
        }
        if !(self.prune_epsilon >= 0.0) {
            self.prune_epsilon = DEFAULT_PRUNE_EPSILON;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = TreeConfig::default();
        assert_eq!(cfg.vectors_per_block, 64);
        assert_eq!(cfg.split_threshold, 512);
        assert_eq!(cfg.search_width, 3);
        assert!((cfg.prune_epsilon - 0.1).abs() < 1e-12);
        assert!(!cfg.use_offheap);
        assert_eq!(cfg.search_pool_workers, 0);
    }

    #[test]
    fn zero_fields_fall_back() {
        let cfg = TreeConfig {
            vectors_per_block: 0,
            split_threshold: 0,
            search_width: 0,
            ..TreeConfig::default()
        }
        .normalized();
        assert_eq!(cfg.vectors_per_block, 64);
        assert_eq!(cfg.split_threshold, 512);
        assert_eq!(cfg.search_width, 3);
    }

    #[test]
    fn negative_epsilon_clamped() {
        let cfg = TreeConfig {
            prune_epsilon: -0.5,
            ..TreeConfig::default()
        }
        .normalized();
        assert!((cfg.prune_epsilon - DEFAULT_PRUNE_EPSILON).abs() < 1e-12);

        let cfg = TreeConfig {
            prune_epsilon: f64::NAN,
            ..TreeConfig::default()
        }
        .normalized();
        assert!((cfg.prune_epsilon - DEFAULT_PRUNE_EPSILON).abs() < 1e-12);
    }

    #[test]
    fn threshold_raised_to_block_size() {
        let cfg = TreeConfig {
            vectors_per_block: 32,
            split_threshold: 8,
            ..TreeConfig::default()
        }
        .normalized();
        assert_eq!(cfg.split_threshold, 32);
    }
}
