//! Tree nodes: block-backed leaves and routing internals.
//!
//! There are exactly two node kinds, modelled as a tagged sum. Child slots
//! hold atomically swappable `Arc<Node>` pointers so a split can publish its
//! replacement subtree with a single release store; readers either observe
//! the old (frozen, never again mutated) leaf or the new internal.

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::block::{Block, BlockPool};
use crate::simd;
use crate::DIM;

/// A single search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Chunk identifier passed to `add`, returned verbatim.
    pub chunk_id: u64,
    /// Cosine similarity (dot product for L2-normalised vectors).
    pub score: f64,
}

/// A tree node: either a leaf holding vectors or an internal routing node.
pub enum Node {
    Leaf(Leaf),
    Internal(Internal),
}

impl Node {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// The centroid advertised for routing. For an internal node this is the
    /// first child's centroid, only relevant should the internal itself
    /// become a child of a later split.
    #[must_use]
    pub fn centroid_vec(&self) -> Vec<f32> {
        match self {
            Node::Leaf(leaf) => leaf.centroid_vec(),
            Node::Internal(internal) => internal
                .centroids
                .first()
                .cloned()
                .unwrap_or_else(|| vec![0.0; DIM]),
        }
    }
}

/// Outcome of a leaf insertion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafAdd {
    Added,
    /// The leaf is at `split_threshold`; the caller must split it.
    Full,
    /// Invalid input; nothing was modified.
    Rejected,
}

/// Leaf node: an ordered sequence of blocks, a parallel chunk-id array, and
/// a running mean centroid.
pub struct Leaf {
    vectors_per_block: usize,
    split_threshold: usize,
    state: RwLock<LeafState>,
}

pub(crate) struct LeafState {
    pub(crate) blocks: Vec<Block>,
    pub(crate) ids: Vec<u64>,
    /// Arithmetic mean of all stored vectors. Not re-normalised.
    pub(crate) centroid: Vec<f32>,
    /// Running per-coordinate sum backing the incremental mean.
    sum: Vec<f64>,
}

impl Leaf {
    #[must_use]
    pub fn new(vectors_per_block: usize, split_threshold: usize) -> Self {
        let max_blocks = split_threshold.div_ceil(vectors_per_block).max(1);
        Self {
            vectors_per_block,
            split_threshold,
            state: RwLock::new(LeafState {
                blocks: Vec::with_capacity(max_blocks),
                ids: Vec::with_capacity(split_threshold),
                centroid: vec![0.0; DIM],
                sum: vec![0.0; DIM],
            }),
        }
    }

    /// Reassemble a leaf from persisted parts.
    pub(crate) fn from_parts(
        blocks: Vec<Block>,
        ids: Vec<u64>,
        centroid: Vec<f32>,
        vectors_per_block: usize,
        split_threshold: usize,
    ) -> Self {
        let count = ids.len() as f64;
        let sum = centroid.iter().map(|&c| f64::from(c) * count).collect();
        Self {
            vectors_per_block,
            split_threshold,
            state: RwLock::new(LeafState {
                blocks,
                ids,
                centroid,
                sum,
            }),
        }
    }

    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.state.read().ids.len()
    }

    /// Snapshot of the current centroid.
    #[must_use]
    pub fn centroid_vec(&self) -> Vec<f32> {
        self.state.read().centroid.clone()
    }

    #[must_use]
    pub(crate) fn vectors_per_block(&self) -> usize {
        self.vectors_per_block
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, LeafState> {
        self.state.read()
    }

    /// Append a vector, allocating a fresh block when the last one is full.
    /// After any successful add, `centroid == Σ stored / count`.
    pub(crate) fn add(&self, pool: &BlockPool, vec: &[f32], chunk_id: u64) -> LeafAdd {
        if vec.len() != DIM {
            return LeafAdd::Rejected;
        }
        let mut st = self.state.write();
        let count = st.ids.len();
        if count >= self.split_threshold {
            return LeafAdd::Full;
        }
        let block_idx = count / self.vectors_per_block;
        let slot = count % self.vectors_per_block;
        if slot == 0 {
            st.blocks.push(pool.alloc_block());
        }
        if !st.blocks[block_idx].set_vector(slot, vec) {
            return LeafAdd::Rejected;
        }
        st.ids.push(chunk_id);

        let n = st.ids.len() as f64;
        for i in 0..DIM {
            st.sum[i] += f64::from(vec[i]);
            st.centroid[i] = (st.sum[i] / n) as f32;
        }
        LeafAdd::Added
    }

    /// All stored `(vector, chunk_id)` pairs in insertion order. Pairs whose
    /// block data is unreadable (a severed mmap view) are skipped together,
    /// keeping the two lists parallel.
    pub(crate) fn collect_pairs(&self) -> (Vec<Vec<f32>>, Vec<u64>) {
        let st = self.state.read();
        let count = st.ids.len();
        let mut vecs = Vec::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        let mut offset = 0;
        for block in &st.blocks {
            if offset >= count {
                break;
            }
            let data = block.data();
            let in_block = self.vectors_per_block.min(count - offset);
            for s in 0..in_block {
                if let Some(row) = data.get(s * DIM..(s + 1) * DIM) {
                    vecs.push(row.to_vec());
                    ids.push(st.ids[offset + s]);
                }
            }
            offset += in_block;
        }
        (vecs, ids)
    }
}

/// Internal node: an ordered list of `(centroid, child slot)` pairs.
///
/// The centroid list is fixed at construction; only the child slots are
/// swappable afterwards.
pub struct Internal {
    centroids: Vec<Vec<f32>>,
    children: Vec<ArcSwap<Node>>,
}

impl Internal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            centroids: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn from_parts(centroids: Vec<Vec<f32>>, children: Vec<Arc<Node>>) -> Self {
        Self {
            centroids,
            children: children.into_iter().map(ArcSwap::new).collect(),
        }
    }

    /// Append a child, recording a copy of its current centroid.
    pub fn add_child(&mut self, child: Arc<Node>) {
        self.centroids.push(child.centroid_vec());
        self.children.push(ArcSwap::new(child));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub(crate) fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub(crate) fn slots(&self) -> &[ArcSwap<Node>] {
        &self.children
    }

    /// Index of the child whose centroid scores highest against `query`.
    /// Ties resolve to the lower index.
    #[must_use]
    pub fn best_child(&self, query: &[f32]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, centroid) in self.centroids.iter().enumerate() {
            let score = simd::dot(query, centroid);
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((i, score)),
            }
        }
        best.map(|(i, _)| i)
    }

    #[must_use]
    pub fn child(&self, i: usize) -> Option<Arc<Node>> {
        self.children.get(i).map(ArcSwap::load_full)
    }
}

impl Default for Internal {
    fn default() -> Self {
        Self::new()
    }
}

/// Descending order over score indices: higher score first, then lower
/// chunk id, so selections are deterministic under score ties.
fn cmp_indices(a: usize, b: usize, scores: &[f64], ids: &[u64]) -> Ordering {
    scores[b]
        .total_cmp(&scores[a])
        .then_with(|| ids[a].cmp(&ids[b]))
}

/// Keep the `k` highest-scoring indices in `indices`, sorted descending.
/// Partial selection, not a full sort, when `k < indices.len()`.
pub(crate) fn select_top_indices(indices: &mut Vec<usize>, scores: &[f64], ids: &[u64], k: usize) {
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, |&a, &b| cmp_indices(a, b, scores, ids));
        indices.truncate(k);
    }
    indices.sort_unstable_by(|&a, &b| cmp_indices(a, b, scores, ids));
}

/// Top-K `(chunk_id, score)` pairs from parallel id/score arrays, sorted by
/// score descending. `indices` is caller-owned scratch.
pub(crate) fn top_k_from_scores(
    ids: &[u64],
    scores: &[f64],
    k: usize,
    indices: &mut Vec<usize>,
) -> Vec<SearchResult> {
    if ids.len() != scores.len() || k == 0 || ids.is_empty() {
        return Vec::new();
    }
    let k = k.min(ids.len());
    indices.clear();
    indices.extend(0..ids.len());
    select_top_indices(indices, scores, ids, k);
    indices
        .iter()
        .map(|&i| SearchResult {
            chunk_id: ids[i],
            score: scores[i],
        })
        .collect()
}
