//! canopy: a density-adaptive hierarchical routing tree for approximate
//! nearest-neighbour search.
//!
//! The index ingests `(vector, chunk_id)` pairs one at a time, grows a
//! descending routing tree whose leaves hold raw vectors in cache-friendly
//! blocks, and answers top-K cosine-similarity queries against that tree.
//! Vectors are fixed at [`DIM`] float32 components and must be L2-normalised
//! by the caller; similarity is then a plain dot product.
//!
//! # Which entry point should I use?
//!
//! | Situation | Recommendation |
//! |-----------|----------------|
//! | Single writer, in-memory | [`Tree`] |
//! | Write scaling across threads | [`ShardedIndex`] (one tree per shard) |
//! | Serve a built index from disk | [`Tree::open`] / `persist_path` (mmap, read-only) |
//! | Grow an on-disk index | [`append_to`] (full rewrite) |
//!
//! # Design
//!
//! - Leaves accumulate vectors in fixed-capacity blocks and keep a running
//!   mean centroid. A leaf that reaches `split_threshold` is frozen, split
//!   with 2-means, and replaced by an internal node through a single atomic
//!   slot store, so concurrent readers always observe a consistent node.
//! - Multi-path search descends through at most `search_width` children per
//!   internal, keeping only children whose centroid scores within
//!   `prune_epsilon` of the best.
//! - A persisted index is a single file (magic `DHVR`): 64-byte header,
//!   pre-order tree structure, routing table, then page-aligned block data
//!   that is memory-mapped and scored in place on reload.
//!
//! # Example
//!
//! ```rust
//! use canopy::{Tree, TreeConfig, DIM};
//!
//! let tree = Tree::new(TreeConfig::default());
//! let mut v = vec![0.0_f32; DIM];
//! v[0] = 1.0;
//! assert!(tree.add(&v, 42));
//! let hits = tree.search_multi_path(&v, 1);
//! assert_eq!(hits[0].chunk_id, 42);
//! ```
//!
//! # Concurrency contract
//!
//! A tree is single-writer / many-reader: `add` calls must be serialised by
//! the caller (or sharded via [`ShardedIndex`]), while any number of
//! concurrent `search*` calls are safe. See the module docs of [`tree`] for
//! the precise ordering guarantees.

pub mod block;
pub mod config;
pub mod error;
pub mod node;
pub mod persist;
pub mod shard;
pub mod simd;
pub mod store;
pub mod tree;

pub use config::TreeConfig;
pub use error::{IndexError, Result};
pub use node::SearchResult;
pub use persist::append_to;
pub use shard::ShardedIndex;
pub use tree::Tree;

/// Vector dimension handled by the index. Operations that receive a vector
/// of any other length are rejected.
pub const DIM: usize = 512;
