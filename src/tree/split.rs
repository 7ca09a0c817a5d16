//! Leaf splitting via 2-means clustering.
//!
//! A full leaf is frozen, its vectors are partitioned into two clusters by
//! a fixed small number of k-means rounds (K=2), and the leaf is replaced by
//! an internal node over two fresh leaves. Cluster assignment ties resolve
//! to cluster 0, and an empty cluster keeps its previous centroid, so the
//! outcome is deterministic for a fixed RNG seed and insertion sequence.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::block::BlockPool;
use crate::config::TreeConfig;
use crate::node::{Internal, Leaf, LeafAdd, Node};
use crate::simd;
use crate::DIM;

pub(crate) const KMEANS_ROUNDS: usize = 8;

/// Split a full leaf into an internal node with two children. Returns
/// `None` when the leaf is not actually at threshold or re-insertion fails.
pub(crate) fn split_leaf(
    leaf: &Leaf,
    pool: &BlockPool,
    cfg: &TreeConfig,
    rng: &mut StdRng,
) -> Option<Internal> {
    if leaf.vector_count() < cfg.split_threshold {
        return None;
    }
    let (vecs, ids) = leaf.collect_pairs();
    let assign = two_means(&vecs, KMEANS_ROUNDS, rng);

    let left = Leaf::new(cfg.vectors_per_block, cfg.split_threshold);
    let right = Leaf::new(cfg.vectors_per_block, cfg.split_threshold);
    for (i, &cluster) in assign.iter().enumerate() {
        let target = if cluster == 0 { &left } else { &right };
        if target.add(pool, &vecs[i], ids[i]) != LeafAdd::Added {
            return None;
        }
    }

    let mut internal = Internal::new();
    internal.add_child(Arc::new(Node::Leaf(left)));
    internal.add_child(Arc::new(Node::Leaf(right)));
    Some(internal)
}

/// Assign each vector to one of two clusters. Initial centroids are sampled
/// uniformly from the input; they may coincide, in which case the first
/// round's tie rule puts everything in cluster 0 and the final guard below
/// restores a usable partition.
fn two_means(vectors: &[Vec<f32>], rounds: usize, rng: &mut StdRng) -> Vec<u8> {
    let n = vectors.len();
    if n < 2 {
        return vec![0; n];
    }
    let mut assign = vec![0_u8; n];
    let mut c0 = vectors[rng.random_range(0..n)].clone();
    let mut c1 = vectors[rng.random_range(0..n)].clone();

    for _ in 0..rounds {
        for (i, v) in vectors.iter().enumerate() {
            let d0 = simd::dot(v, &c0);
            let d1 = simd::dot(v, &c1);
            assign[i] = u8::from(d0 < d1);
        }

        let mut sum0 = vec![0.0_f64; DIM];
        let mut sum1 = vec![0.0_f64; DIM];
        let mut cnt0 = 0_usize;
        let mut cnt1 = 0_usize;
        for (i, v) in vectors.iter().enumerate() {
            let (sum, cnt) = if assign[i] == 0 {
                (&mut sum0, &mut cnt0)
            } else {
                (&mut sum1, &mut cnt1)
            };
            for (s, &x) in sum.iter_mut().zip(v.iter()) {
                *s += f64::from(x);
            }
            *cnt += 1;
        }
        if cnt0 > 0 {
            for (c, &s) in c0.iter_mut().zip(sum0.iter()) {
                *c = (s / cnt0 as f64) as f32;
            }
        }
        if cnt1 > 0 {
            for (c, &s) in c1.iter_mut().zip(sum1.iter()) {
                *c = (s / cnt1 as f64) as f32;
            }
        }
        // An empty cluster keeps its previous centroid.
    }

    // Coincident or identical inputs can leave one side empty, which would
    // rebuild the full leaf verbatim; halve by insertion order instead.
    let cnt1 = assign.iter().filter(|&&a| a == 1).count();
    if cnt1 == 0 || cnt1 == n {
        for (i, a) in assign.iter_mut().enumerate() {
            *a = u8::from(i >= n / 2);
        }
    }
    assign
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn one_hot(i: usize) -> Vec<f32> {
        let mut v = vec![0.0_f32; DIM];
        v[i] = 1.0;
        v
    }

    fn full_leaf(pool: &BlockPool, vecs: &[Vec<f32>]) -> Leaf {
        let leaf = Leaf::new(4, vecs.len());
        for (i, v) in vecs.iter().enumerate() {
            assert_eq!(leaf.add(pool, v, i as u64), LeafAdd::Added);
        }
        leaf
    }

    #[test]
    fn split_preserves_all_ids() {
        let pool = BlockPool::new(4, false);
        let vecs: Vec<Vec<f32>> = (0..8).map(one_hot).collect();
        let cfg = TreeConfig {
            vectors_per_block: 4,
            split_threshold: 8,
            ..TreeConfig::default()
        };
        let leaf = full_leaf(&pool, &vecs);

        let mut rng = StdRng::seed_from_u64(1);
        let internal = split_leaf(&leaf, &pool, &cfg, &mut rng).unwrap();
        assert_eq!(internal.len(), 2);

        let mut recovered: Vec<u64> = Vec::new();
        for i in 0..2 {
            let child = internal.child(i).unwrap();
            let Node::Leaf(child_leaf) = child.as_ref() else {
                panic!("split children must be leaves");
            };
            assert!(child_leaf.vector_count() > 0, "no child may be empty");
            let (_, ids) = child_leaf.collect_pairs();
            recovered.extend(ids);
        }
        recovered.sort_unstable();
        assert_eq!(recovered, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn refuses_leaf_below_threshold() {
        let pool = BlockPool::new(4, false);
        let cfg = TreeConfig {
            vectors_per_block: 4,
            split_threshold: 8,
            ..TreeConfig::default()
        };
        let leaf = Leaf::new(4, 8);
        leaf.add(&pool, &one_hot(0), 0);

        let mut rng = StdRng::seed_from_u64(1);
        assert!(split_leaf(&leaf, &pool, &cfg, &mut rng).is_none());
    }

    #[test]
    fn assignment_is_deterministic_for_a_seed() {
        let vecs: Vec<Vec<f32>> = (0..16).map(one_hot).collect();
        let a1 = two_means(&vecs, KMEANS_ROUNDS, &mut StdRng::seed_from_u64(99));
        let a2 = two_means(&vecs, KMEANS_ROUNDS, &mut StdRng::seed_from_u64(99));
        assert_eq!(a1, a2);
    }

    #[test]
    fn identical_vectors_still_partition() {
        let vecs: Vec<Vec<f32>> = (0..8).map(|_| one_hot(0)).collect();
        let assign = two_means(&vecs, KMEANS_ROUNDS, &mut StdRng::seed_from_u64(5));
        let ones = assign.iter().filter(|&&a| a == 1).count();
        assert!(ones > 0 && ones < 8, "both clusters must be non-empty");
    }
}
