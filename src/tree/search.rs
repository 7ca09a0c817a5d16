//! Multi-path search: adaptive centroid pruning, leaf scans, dedup, top-K.
//!
//! Every searching thread owns a reusable [`SearchScratch`] bundle (scores,
//! index buffer, dedup maps, per-query batch buffers). Scratch is reset on
//! entry, grown on demand, and never shared between concurrent queries;
//! worker threads of the search pools own theirs outright, direct callers
//! borrow a thread-local one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::node::{select_top_indices, top_k_from_scores, Leaf, Node, SearchResult};
use crate::simd;
use crate::tree::TreeCore;
use crate::DIM;

/// Reusable per-worker search buffers.
pub(crate) struct SearchScratch {
    scores: Vec<f64>,
    indices: Vec<usize>,
    seen: HashMap<u64, f64>,
    batch_seen: Vec<HashMap<u64, f64>>,
    batch_scores: Vec<Vec<f64>>,
}

impl SearchScratch {
    pub(crate) fn new() -> Self {
        Self {
            scores: Vec::new(),
            indices: Vec::new(),
            seen: HashMap::new(),
            batch_seen: Vec::new(),
            batch_scores: Vec::new(),
        }
    }
}

thread_local! {
    static SCRATCH: RefCell<SearchScratch> = RefCell::new(SearchScratch::new());
}

/// Run `f` with this thread's scratch bundle.
pub(crate) fn with_scratch<R>(f: impl FnOnce(&mut SearchScratch) -> R) -> R {
    SCRATCH.with(|s| f(&mut s.borrow_mut()))
}

impl TreeCore {
    /// Single-path descent: follow the best child at every internal, then
    /// scan one leaf. Lowest latency, lowest recall.
    pub(crate) fn search_single_impl(
        &self,
        query: &[f32],
        k: usize,
        scratch: &mut SearchScratch,
    ) -> Vec<SearchResult> {
        let Some(mut node) = self.root.load_full() else {
            return Vec::new();
        };
        loop {
            match node.as_ref() {
                Node::Leaf(leaf) => return scan_leaf_top_k(leaf, query, k, scratch),
                Node::Internal(internal) => {
                    let Some(idx) = internal.best_child(query) else {
                        return Vec::new();
                    };
                    let Some(child) = internal.child(idx) else {
                        return Vec::new();
                    };
                    node = child;
                }
            }
        }
    }

    /// Multi-path descent with centroid pruning, dedup by chunk id keeping
    /// the best score, and a final bounded top-K selection.
    pub(crate) fn search_multi_path_impl(
        &self,
        query: &[f32],
        k: usize,
        scratch: &mut SearchScratch,
    ) -> Vec<SearchResult> {
        let Some(root) = self.root.load_full() else {
            return Vec::new();
        };
        scratch.seen.clear();
        let width = self.cfg.search_width;
        let per_leaf = k.saturating_mul(width);
        multi_path_node(
            &root,
            query,
            per_leaf,
            width,
            self.cfg.prune_epsilon,
            scratch,
        );
        top_k_from_seen(&scratch.seen, k)
    }

    /// Batched multi-path search. The per-query leaf sets are inverted into
    /// a leaf → queries map so each leaf's blocks are scanned exactly once,
    /// scoring every query that reached the leaf before moving on. Results
    /// match the single-query path query-for-query.
    pub(crate) fn search_multi_path_batch_impl(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        scratch: &mut SearchScratch,
    ) -> Vec<Vec<SearchResult>> {
        let m = queries.len();
        let mut out: Vec<Vec<SearchResult>> = vec![Vec::new(); m];
        if m == 0 || k == 0 {
            return out;
        }
        let Some(root) = self.root.load_full() else {
            return out;
        };
        let width = self.cfg.search_width;
        let eps = self.cfg.prune_epsilon;
        let per_leaf = k.saturating_mul(width);

        if scratch.batch_seen.len() < m {
            scratch.batch_seen.resize_with(m, HashMap::new);
        }
        for seen in scratch.batch_seen.iter_mut().take(m) {
            seen.clear();
        }

        let mut leaf_queries: Vec<(Arc<Node>, SmallVec<[usize; 8]>)> = Vec::new();
        for (qi, query) in queries.iter().enumerate() {
            if query.len() != DIM {
                continue;
            }
            collect_leaves(&root, query, width, eps, qi, &mut leaf_queries);
        }

        for (leaf_node, q_idxs) in &leaf_queries {
            let Node::Leaf(leaf) = leaf_node.as_ref() else {
                continue;
            };
            let st = leaf.state();
            let count = st.ids.len();
            if count == 0 {
                continue;
            }
            if scratch.batch_scores.len() < q_idxs.len() {
                scratch.batch_scores.resize_with(q_idxs.len(), Vec::new);
            }
            for scores in scratch.batch_scores.iter_mut().take(q_idxs.len()) {
                if scores.len() < count {
                    scores.resize(count, 0.0);
                }
            }

            let vpb = leaf.vectors_per_block();
            let mut offset = 0;
            for block in &st.blocks {
                if offset >= count {
                    break;
                }
                let n = vpb.min(count - offset);
                for (pos, &qi) in q_idxs.iter().enumerate() {
                    let dst = &mut scratch.batch_scores[pos][offset..offset + n];
                    if !block.dot_batch_into(&queries[qi], n, dst) {
                        dst.fill(0.0);
                    }
                }
                offset += n;
            }

            let take = per_leaf.min(count);
            for (pos, &qi) in q_idxs.iter().enumerate() {
                scratch.indices.clear();
                scratch.indices.extend(0..count);
                select_top_indices(
                    &mut scratch.indices,
                    &scratch.batch_scores[pos][..count],
                    &st.ids,
                    take,
                );
                let seen = &mut scratch.batch_seen[qi];
                for &i in &scratch.indices {
                    let score = scratch.batch_scores[pos][i];
                    seen.entry(st.ids[i])
                        .and_modify(|s| {
                            if score > *s {
                                *s = score;
                            }
                        })
                        .or_insert(score);
                }
            }
        }

        for (qi, slot) in out.iter_mut().enumerate() {
            *slot = top_k_from_seen(&scratch.batch_seen[qi], k);
        }
        out
    }
}

fn multi_path_node(
    node: &Arc<Node>,
    query: &[f32],
    per_leaf: usize,
    width: usize,
    epsilon: f64,
    scratch: &mut SearchScratch,
) {
    match node.as_ref() {
        Node::Leaf(leaf) => merge_leaf_candidates(leaf, query, per_leaf, scratch),
        Node::Internal(internal) => {
            for idx in pruned_children(internal.centroids(), query, width, epsilon) {
                if let Some(child) = internal.child(idx) {
                    multi_path_node(&child, query, per_leaf, width, epsilon, scratch);
                }
            }
        }
    }
}

/// Collect the leaves a query would visit, appending `qi` to each leaf's
/// query list in `out`. Leaf identity is pointer identity.
fn collect_leaves(
    node: &Arc<Node>,
    query: &[f32],
    width: usize,
    epsilon: f64,
    qi: usize,
    out: &mut Vec<(Arc<Node>, SmallVec<[usize; 8]>)>,
) {
    match node.as_ref() {
        Node::Leaf(_) => {
            if let Some(entry) = out.iter_mut().find(|(n, _)| Arc::ptr_eq(n, node)) {
                entry.1.push(qi);
            } else {
                out.push((Arc::clone(node), smallvec![qi]));
            }
        }
        Node::Internal(internal) => {
            for idx in pruned_children(internal.centroids(), query, width, epsilon) {
                if let Some(child) = internal.child(idx) {
                    collect_leaves(&child, query, width, epsilon, qi, out);
                }
            }
        }
    }
}

/// Adaptive pruning over an internal's centroids: children scoring at least
/// `best - epsilon` are eligible, and at most `max_children` of them are
/// kept, highest-scoring first.
pub(crate) fn pruned_children(
    centroids: &[Vec<f32>],
    query: &[f32],
    max_children: usize,
    epsilon: f64,
) -> SmallVec<[usize; 8]> {
    let mut picked: SmallVec<[usize; 8]> = SmallVec::new();
    if centroids.is_empty() || max_children == 0 {
        return picked;
    }
    let mut scores: SmallVec<[f64; 8]> = SmallVec::with_capacity(centroids.len());
    let mut best = f64::NEG_INFINITY;
    for centroid in centroids {
        let s = simd::dot(query, centroid);
        if s > best {
            best = s;
        }
        scores.push(s);
    }
    let threshold = best - epsilon;
    for (i, &s) in scores.iter().enumerate() {
        if s >= threshold {
            picked.push(i);
        }
    }
    if picked.len() > max_children {
        picked.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]).then_with(|| a.cmp(&b)));
        picked.truncate(max_children);
    }
    picked
}

/// Score every stored vector in `leaf` and fold the top `take` candidates
/// into the dedup map, keeping the maximum score per chunk id.
fn merge_leaf_candidates(leaf: &Leaf, query: &[f32], take: usize, scratch: &mut SearchScratch) {
    let st = leaf.state();
    let count = st.ids.len();
    if count == 0 || take == 0 {
        return;
    }
    if scratch.scores.len() < count {
        scratch.scores.resize(count, 0.0);
    }
    fill_scores(&st.blocks, leaf.vectors_per_block(), count, query, &mut scratch.scores);

    let take = take.min(count);
    scratch.indices.clear();
    scratch.indices.extend(0..count);
    select_top_indices(&mut scratch.indices, &scratch.scores[..count], &st.ids, take);

    for &i in &scratch.indices {
        let score = scratch.scores[i];
        scratch
            .seen
            .entry(st.ids[i])
            .and_modify(|s| {
                if score > *s {
                    *s = score;
                }
            })
            .or_insert(score);
    }
}

/// Sorted top-K scan of one leaf (single-path terminal case).
fn scan_leaf_top_k(
    leaf: &Leaf,
    query: &[f32],
    k: usize,
    scratch: &mut SearchScratch,
) -> Vec<SearchResult> {
    let st = leaf.state();
    let count = st.ids.len();
    if count == 0 {
        return Vec::new();
    }
    if scratch.scores.len() < count {
        scratch.scores.resize(count, 0.0);
    }
    fill_scores(&st.blocks, leaf.vectors_per_block(), count, query, &mut scratch.scores);
    top_k_from_scores(&st.ids, &scratch.scores[..count], k, &mut scratch.indices)
}

fn fill_scores(
    blocks: &[crate::block::Block],
    vpb: usize,
    count: usize,
    query: &[f32],
    scores: &mut [f64],
) {
    let mut offset = 0;
    for block in blocks {
        if offset >= count {
            break;
        }
        let n = vpb.min(count - offset);
        let dst = &mut scores[offset..offset + n];
        if !block.dot_batch_into(query, n, dst) {
            dst.fill(0.0);
        }
        offset += n;
    }
}

/// Final top-K over the dedup map, sorted by score descending (ties by
/// chunk id ascending). Returns exactly `min(k, |seen|)` results.
pub(crate) fn top_k_from_seen(seen: &HashMap<u64, f64>, k: usize) -> Vec<SearchResult> {
    if seen.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut all: Vec<SearchResult> = seen
        .iter()
        .map(|(&chunk_id, &score)| SearchResult { chunk_id, score })
        .collect();
    let k = k.min(all.len());
    let cmp = |a: &SearchResult, b: &SearchResult| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    };
    if k < all.len() {
        all.select_nth_unstable_by(k - 1, cmp);
        all.truncate(k);
    }
    all.sort_unstable_by(cmp);
    all
}
