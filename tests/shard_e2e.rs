//! Sharded index end-to-end behaviour.

use canopy::{ShardedIndex, TreeConfig, DIM};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_unit_vectors(n: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>()).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
            for x in &mut v {
                *x /= norm;
            }
            v
        })
        .collect()
}

#[test]
fn thousand_vectors_route_evenly() {
    let index = ShardedIndex::new(TreeConfig::default(), 4);
    let vecs = random_unit_vectors(1000, 55);
    for (i, v) in vecs.iter().enumerate() {
        assert!(index.add(v, i as u64), "add {i} failed");
    }

    // chunk_id % 4 routing: ids 0..999 land 250 per shard.
    let counts = index.vector_counts();
    assert_eq!(counts.len(), 4);
    assert_eq!(counts, vec![250, 250, 250, 250]);
    assert_eq!(counts.iter().sum::<usize>(), 1000);
}

#[test]
fn cross_shard_search_finds_exact_matches() {
    let index = ShardedIndex::new(
        TreeConfig {
            split_seed: Some(13),
            ..TreeConfig::default()
        },
        4,
    );
    let vecs = random_unit_vectors(400, 19);
    for (i, v) in vecs.iter().enumerate() {
        index.add(v, i as u64);
    }

    for q in [0_usize, 1, 2, 3, 101, 202, 303] {
        let results = index.search_multi_path(&vecs[q], 5);
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk_id, q as u64, "query {q}");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}

#[test]
fn sharded_batch_matches_sharded_single() {
    let index = ShardedIndex::new(
        TreeConfig {
            split_seed: Some(23),
            ..TreeConfig::default()
        },
        3,
    );
    let vecs = random_unit_vectors(300, 31);
    for (i, v) in vecs.iter().enumerate() {
        index.add(v, i as u64);
    }

    let queries: Vec<Vec<f32>> = vec![vecs[0].clone(), vecs[7].clone(), vecs[150].clone()];
    let batch = index.search_multi_path_batch(&queries, 5);
    assert_eq!(batch.len(), queries.len());

    for (qi, query) in queries.iter().enumerate() {
        let single = index.search_multi_path(query, 5);
        assert_eq!(batch[qi].len(), single.len(), "query {qi}");
        for (a, b) in batch[qi].iter().zip(single.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
            assert!((a.score - b.score).abs() < 1e-5);
        }
    }
}

#[test]
fn concurrent_per_shard_writers() {
    let index = std::sync::Arc::new(ShardedIndex::new(TreeConfig::default(), 4));
    let vecs = random_unit_vectors(200, 67);

    // One writer per shard: each thread owns the ids congruent to its shard.
    std::thread::scope(|scope| {
        for shard in 0..4_u64 {
            let index = std::sync::Arc::clone(&index);
            let vecs = &vecs;
            scope.spawn(move || {
                for (i, v) in vecs.iter().enumerate() {
                    let id = i as u64;
                    if id % 4 == shard {
                        assert!(index.add(v, id));
                    }
                }
            });
        }
    });

    assert_eq!(index.vector_counts().iter().sum::<usize>(), 200);
    let hit = index.search_multi_path(&vecs[42], 1);
    assert_eq!(hit[0].chunk_id, 42);
}
