//! The dynamic descending tree: routing, insertion, and search entry points.
//!
//! # Concurrency model
//!
//! The tree is single-writer / many-reader. Concurrent `add` calls against
//! the same tree are unsupported; callers serialise writes or shard across
//! trees ([`crate::ShardedIndex`]). Any number of concurrent `search*`
//! calls are safe: readers follow atomic node-slot loads and never mutate
//! tree structure. A split builds its replacement subtree fully and
//! publishes it with a single release store on the slot; readers observe
//! either the old frozen leaf or the new internal, never a mix.
//!
//! Within the single writer thread, `add(v1)` happens-before `add(v2)`;
//! any reader that observes `v2` also observes `v1`. Search results are
//! consistent with some prefix of the write sequence.

pub(crate) mod search;
pub(crate) mod search_pool;
pub(crate) mod split;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::block::BlockPool;
use crate::config::TreeConfig;
use crate::error::Result;
use crate::node::{Leaf, LeafAdd, Node, SearchResult};
use crate::persist;
use crate::store::MmapStore;
use crate::tree::search::with_scratch;
use crate::tree::search_pool::SearchPool;
use crate::DIM;

const SEARCH_POOL_QUEUE: usize = 64;

/// A density-adaptive hierarchical routing tree over [`DIM`]-dimensional
/// L2-normalised vectors.
pub struct Tree {
    core: Arc<TreeCore>,
    search_pool: Option<SearchPool>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree").finish_non_exhaustive()
    }
}

/// Shared tree state. Search-pool workers hold this directly so the pool
/// does not keep the owning [`Tree`] alive.
pub(crate) struct TreeCore {
    pub(crate) cfg: TreeConfig,
    /// `None` for a tree loaded from a persisted file (read-only).
    pub(crate) pool: Option<BlockPool>,
    pub(crate) root: ArcSwapOption<Node>,
    /// Keeps the file mapping alive for mmap-backed trees.
    pub(crate) store: Mutex<Option<Arc<MmapStore>>>,
    split_rng: Mutex<StdRng>,
}

impl Tree {
    /// Create a tree. When `persist_path` is set and the file exists, the
    /// tree opens read-only from it; a failed open logs and falls through
    /// to an empty writable tree.
    #[must_use]
    pub fn new(cfg: TreeConfig) -> Self {
        let cfg = cfg.normalized();
        if let Some(path) = cfg.persist_path.clone() {
            if path.exists() {
                match Self::open(&path, cfg.clone()) {
                    Ok(tree) => return tree,
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            path = %path.display(),
                            "failed to open persisted index, starting empty"
                        );
                    }
                }
            }
        }
        let pool = BlockPool::new(cfg.vectors_per_block, cfg.use_offheap);
        let split_rng = Mutex::new(split_rng_for(&cfg));
        let core = Arc::new(TreeCore {
            cfg,
            pool: Some(pool),
            root: ArcSwapOption::empty(),
            store: Mutex::new(None),
            split_rng,
        });
        Self::with_core(core)
    }

    /// Open a persisted index read-only (mmap-backed). `add` on the
    /// returned tree always fails.
    pub fn open(path: &Path, cfg: TreeConfig) -> Result<Self> {
        let cfg = cfg.normalized();
        let core = persist::load_core(path, cfg)?;
        Ok(Self::with_core(Arc::new(core)))
    }

    fn with_core(core: Arc<TreeCore>) -> Self {
        let search_pool = if core.cfg.search_pool_workers > 0 {
            Some(SearchPool::new(
                Arc::clone(&core),
                core.cfg.search_pool_workers,
                SEARCH_POOL_QUEUE,
            ))
        } else {
            None
        };
        Self { core, search_pool }
    }

    /// The normalised configuration this tree runs with.
    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.core.cfg
    }

    /// Whether this tree was loaded from a persisted file.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.core.pool.is_none()
    }

    /// Insert a vector under an opaque chunk id. Returns `false` when the
    /// vector is not [`DIM`]-long, the tree is read-only, or a required
    /// split could not be performed.
    ///
    /// Single-writer: concurrent `add` calls are not supported.
    pub fn add(&self, vec: &[f32], chunk_id: u64) -> bool {
        self.core.add(vec, chunk_id)
    }

    /// Single-path top-K search. Lowest latency; use
    /// [`Tree::search_multi_path`] for higher recall.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if query.len() != DIM || k == 0 {
            return Vec::new();
        }
        with_scratch(|scratch| self.core.search_single_impl(query, k, scratch))
    }

    /// Multi-path top-K search with adaptive centroid pruning. Results are
    /// sorted by score descending and deduplicated by chunk id.
    #[must_use]
    pub fn search_multi_path(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if query.len() != DIM || k == 0 {
            return Vec::new();
        }
        if let Some(pool) = &self.search_pool {
            return pool.search(query, k);
        }
        with_scratch(|scratch| self.core.search_multi_path_impl(query, k, scratch))
    }

    /// Batched multi-path search: one result list per query, each equal to
    /// what [`Tree::search_multi_path`] would return for that query. Block
    /// loads are amortised across queries that reach the same leaf.
    #[must_use]
    pub fn search_multi_path_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
    ) -> Vec<Vec<SearchResult>> {
        with_scratch(|scratch| self.core.search_multi_path_batch_impl(queries, k, scratch))
    }

    /// Persist the tree to `path` atomically (write `path.tmp`, fsync,
    /// rename). Not concurrent-safe with `add`.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        persist::save_atomic(&self.core, path)
    }

    /// Release a loaded tree's mapping. The tree becomes empty; the mapping
    /// itself is unmapped once the last in-flight reader drops its node
    /// references. No-op for heap trees.
    pub fn close_persisted(&self) {
        self.core.root.store(None);
        *self.core.store.lock() = None;
    }

    pub(crate) fn root_node(&self) -> Option<Arc<Node>> {
        self.core.root.load_full()
    }

    /// Total number of stored vectors.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        match self.core.root.load_full() {
            Some(root) => count_node(&root),
            None => 0,
        }
    }
}

fn split_rng_for(cfg: &TreeConfig) -> StdRng {
    let seed = cfg.split_seed.unwrap_or_else(|| rand::rng().random());
    StdRng::seed_from_u64(seed)
}

fn count_node(node: &Node) -> usize {
    match node {
        Node::Leaf(leaf) => leaf.vector_count(),
        Node::Internal(internal) => (0..internal.len())
            .filter_map(|i| internal.child(i))
            .map(|child| count_node(&child))
            .sum(),
    }
}

impl TreeCore {
    /// Core for a tree reconstructed from a persisted file: no pool, so
    /// every `add` is refused, and the store keeps the mapping alive.
    pub(crate) fn read_only(cfg: TreeConfig, root: Arc<Node>, store: Arc<MmapStore>) -> Self {
        let split_rng = Mutex::new(split_rng_for(&cfg));
        Self {
            cfg,
            pool: None,
            root: ArcSwapOption::from(Some(root)),
            store: Mutex::new(Some(store)),
            split_rng,
        }
    }

    pub(crate) fn add(&self, vec: &[f32], chunk_id: u64) -> bool {
        let Some(pool) = &self.pool else {
            return false; // read-only
        };
        if vec.len() != DIM {
            return false;
        }
        let Some(root) = self.root.load_full() else {
            let leaf = Leaf::new(self.cfg.vectors_per_block, self.cfg.split_threshold);
            if leaf.add(pool, vec, chunk_id) != LeafAdd::Added {
                return false;
            }
            self.root.store(Some(Arc::new(Node::Leaf(leaf))));
            return true;
        };

        let (ok, to_split) = self.add_to_node(&root, vec, chunk_id);
        if ok {
            return true;
        }
        let Some(full) = to_split else {
            return false;
        };
        let Node::Leaf(leaf) = full.as_ref() else {
            return false;
        };
        let replacement = {
            let mut rng = self.split_rng.lock();
            match split::split_leaf(leaf, pool, &self.cfg, &mut rng) {
                Some(internal) => Arc::new(Node::Internal(internal)),
                None => return false,
            }
        };
        tracing::debug!(vectors = leaf.vector_count(), "split full leaf");
        if !self.replace_node(&full, &replacement) {
            return false;
        }
        // Retry once; the add now descends into one of the new leaves.
        let Some(root) = self.root.load_full() else {
            return false;
        };
        self.add_to_node(&root, vec, chunk_id).0
    }

    /// Descend to the routed leaf and try to insert. On a full leaf,
    /// returns the leaf's node so the caller can split it.
    fn add_to_node(
        &self,
        node: &Arc<Node>,
        vec: &[f32],
        chunk_id: u64,
    ) -> (bool, Option<Arc<Node>>) {
        match node.as_ref() {
            Node::Leaf(leaf) => {
                let Some(pool) = &self.pool else {
                    return (false, None);
                };
                match leaf.add(pool, vec, chunk_id) {
                    LeafAdd::Added => (true, None),
                    LeafAdd::Full => (false, Some(Arc::clone(node))),
                    LeafAdd::Rejected => (false, None),
                }
            }
            Node::Internal(internal) => {
                let Some(idx) = internal.best_child(vec) else {
                    return (false, None);
                };
                let Some(child) = internal.child(idx) else {
                    return (false, None);
                };
                self.add_to_node(&child, vec, chunk_id)
            }
        }
    }

    /// Swap `replacement` into the slot currently holding `old`. The store
    /// is a single atomic release; readers keep scanning the frozen old
    /// leaf or descend into the replacement.
    fn replace_node(&self, old: &Arc<Node>, replacement: &Arc<Node>) -> bool {
        let Some(current) = self.root.load_full() else {
            return false;
        };
        if Arc::ptr_eq(&current, old) {
            self.root.store(Some(Arc::clone(replacement)));
            return true;
        }
        self.replace_in_children(&current, old, replacement)
    }

    fn replace_in_children(
        &self,
        node: &Arc<Node>,
        old: &Arc<Node>,
        replacement: &Arc<Node>,
    ) -> bool {
        let Node::Internal(internal) = node.as_ref() else {
            return false;
        };
        for slot in internal.slots() {
            let current = slot.load_full();
            if Arc::ptr_eq(&current, old) {
                slot.store(Arc::clone(replacement));
                return true;
            }
            if self.replace_in_children(&current, old, replacement) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(i: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; DIM];
        v[i] = 1.0;
        v
    }

    fn small_cfg() -> TreeConfig {
        TreeConfig {
            vectors_per_block: 4,
            split_threshold: 8,
            search_width: 2,
            split_seed: Some(7),
            ..TreeConfig::default()
        }
    }

    #[test]
    fn empty_tree_returns_nothing() {
        let tree = Tree::new(small_cfg());
        assert!(tree.search(&one_hot(0), 3).is_empty());
        assert!(tree.search_multi_path(&one_hot(0), 3).is_empty());
        assert_eq!(tree.vector_count(), 0);
    }

    #[test]
    fn add_rejects_wrong_dimension_and_bad_k() {
        let tree = Tree::new(small_cfg());
        assert!(!tree.add(&[1.0, 0.0], 0));
        assert!(tree.add(&one_hot(0), 0));
        assert!(tree.search_multi_path(&one_hot(0), 0).is_empty());
        assert!(tree.search_multi_path(&[1.0, 0.0], 3).is_empty());
    }

    #[test]
    fn grows_past_split_threshold() {
        let tree = Tree::new(small_cfg());
        for i in 0..10 {
            assert!(tree.add(&one_hot(i), i as u64), "add {i} failed");
        }
        assert_eq!(tree.vector_count(), 10);
    }

    #[test]
    fn single_path_finds_exact_match() {
        let tree = Tree::new(small_cfg());
        for i in 0..6 {
            tree.add(&one_hot(i), i as u64);
        }
        let hits = tree.search(&one_hot(2), 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_pool_matches_direct_search() {
        let cfg = TreeConfig {
            search_pool_workers: 2,
            ..small_cfg()
        };
        let pooled = Tree::new(cfg);
        let direct = Tree::new(small_cfg());
        for i in 0..10 {
            pooled.add(&one_hot(i), i as u64);
            direct.add(&one_hot(i), i as u64);
        }
        for i in 0..10 {
            let a = pooled.search_multi_path(&one_hot(i), 3);
            let b = direct.search_multi_path(&one_hot(i), 3);
            assert_eq!(a.len(), b.len());
            assert_eq!(a[0].chunk_id, b[0].chunk_id);
        }
    }
}
