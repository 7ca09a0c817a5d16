//! Property-based tests for the routing tree invariants.
//!
//! - every added chunk id stays retrievable (self-recall)
//! - batched search matches the single-query path result-for-result
//! - results are sorted and free of duplicate ids
//! - the dispatched dot kernel matches the scalar reference

use canopy::{simd, Tree, TreeConfig, DIM};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn random_unit_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
            for x in &mut v {
                *x /= norm;
            }
            v
        })
        .collect()
}

/// Two children per internal and an epsilon beyond the score range: every
/// leaf is visited, so retrieval is exhaustive.
fn exhaustive_cfg(seed: u64) -> TreeConfig {
    TreeConfig {
        vectors_per_block: 4,
        split_threshold: 8,
        search_width: 2,
        prune_epsilon: 3.0,
        split_seed: Some(seed),
        ..TreeConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_added_id_is_retrievable(seed in any::<u64>(), n in 1usize..48) {
        let vecs = random_unit_vectors(n, seed);
        let tree = Tree::new(exhaustive_cfg(seed));
        for (i, v) in vecs.iter().enumerate() {
            prop_assert!(tree.add(v, i as u64));
        }
        for (i, v) in vecs.iter().enumerate() {
            let results = tree.search_multi_path(v, n);
            prop_assert!(
                results.iter().any(|r| r.chunk_id == i as u64),
                "id {} lost after {} adds", i, n
            );
        }
    }

    #[test]
    fn results_sorted_and_unique(seed in any::<u64>(), n in 2usize..64, k in 1usize..16) {
        let vecs = random_unit_vectors(n, seed);
        let tree = Tree::new(exhaustive_cfg(seed));
        for (i, v) in vecs.iter().enumerate() {
            tree.add(v, (i % 7) as u64); // duplicate ids on purpose
        }
        let results = tree.search_multi_path(&vecs[0], k);
        prop_assert!(results.len() <= k);
        let mut ids = HashSet::new();
        for r in &results {
            prop_assert!(ids.insert(r.chunk_id), "duplicate chunk id {}", r.chunk_id);
        }
        for pair in results.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn batch_equals_single(seed in any::<u64>(), n in 8usize..48, m in 1usize..6) {
        let vecs = random_unit_vectors(n, seed);
        let tree = Tree::new(exhaustive_cfg(seed));
        for (i, v) in vecs.iter().enumerate() {
            tree.add(v, i as u64);
        }
        let queries: Vec<Vec<f32>> = (0..m).map(|q| vecs[q % n].clone()).collect();
        let batch = tree.search_multi_path_batch(&queries, 5);
        prop_assert_eq!(batch.len(), queries.len());
        for (qi, query) in queries.iter().enumerate() {
            let single = tree.search_multi_path(query, 5);
            prop_assert_eq!(batch[qi].len(), single.len());
            for (a, b) in batch[qi].iter().zip(single.iter()) {
                prop_assert_eq!(a.chunk_id, b.chunk_id);
                prop_assert!((a.score - b.score).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn dispatched_dot_matches_scalar(
        a in proptest::collection::vec(-1.0f32..1.0, DIM),
        b in proptest::collection::vec(-1.0f32..1.0, DIM),
    ) {
        let fast = simd::dot(&a, &b);
        let reference = simd::dot_scalar(&a, &b);
        prop_assert!(
            (fast - reference).abs() < 1e-5,
            "kernel {} diverged: {} vs {}", simd::kernel_name(), fast, reference
        );
    }

    #[test]
    fn batch_kernel_matches_dot(
        seed in any::<u64>(),
        rows in 1usize..8,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let query: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
        let data: Vec<f32> = (0..rows * DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();

        let batch = simd::dot_batch_flat(&query, &data, rows);
        prop_assert_eq!(batch.len(), rows);
        for (i, &score) in batch.iter().enumerate() {
            let row = &data[i * DIM..(i + 1) * DIM];
            prop_assert!((score - simd::dot(&query, row)).abs() < 1e-10);
        }
    }
}
