//! Sharded index: a fan-out of independent trees keyed by `chunk_id % N`.
//!
//! Writes route to one shard, so per-shard writers never contend. Searches
//! dispatch one job per shard onto a resident worker pool (one channel per
//! worker, routed by shard index), await all shards, then merge candidates
//! with the same dedup-and-top-K used inside a single tree. There is no
//! cross-shard rebalancing; each shard's tree grows independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::config::TreeConfig;
use crate::node::SearchResult;
use crate::tree::search::top_k_from_seen;
use crate::tree::Tree;
use crate::DIM;

const SHARD_QUEUE: usize = 64;

/// N independent heap trees with a shared search-worker pool.
pub struct ShardedIndex {
    shards: Vec<Arc<Tree>>,
    pool: ShardPool,
}

impl ShardedIndex {
    /// Create `n_shards` trees (minimum one) sharing `cfg`. The worker pool
    /// is sized `max(n_shards, cores/2)`.
    #[must_use]
    pub fn new(cfg: TreeConfig, n_shards: usize) -> Self {
        let n_shards = n_shards.max(1);
        let cfg = cfg.normalized();
        let shards: Vec<Arc<Tree>> = (0..n_shards)
            .map(|_| Arc::new(Tree::new(cfg.clone())))
            .collect();
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let workers = n_shards.max(cores / 2).max(1);
        Self {
            shards,
            pool: ShardPool::new(workers, SHARD_QUEUE),
        }
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Per-shard vector counts, in shard order.
    #[must_use]
    pub fn vector_counts(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.vector_count()).collect()
    }

    /// Insert a vector, routed to shard `chunk_id % n_shards`. Safe for
    /// concurrent callers as long as each shard receives writes from a
    /// single writer (e.g. writers partitioned by `chunk_id % n_shards`).
    pub fn add(&self, vec: &[f32], chunk_id: u64) -> bool {
        let idx = (chunk_id % self.shards.len() as u64) as usize;
        self.shards[idx].add(vec, chunk_id)
    }

    /// Query every shard in parallel and merge the top-K, deduplicating by
    /// chunk id and keeping the maximum score.
    #[must_use]
    pub fn search_multi_path(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if query.len() != DIM || k == 0 {
            return Vec::new();
        }
        let (reply_tx, reply_rx) = bounded(self.shards.len());
        let query: Arc<Vec<f32>> = Arc::new(query.to_vec());
        for (i, shard) in self.shards.iter().enumerate() {
            self.pool.submit(
                i,
                ShardJob::Single {
                    shard: Arc::clone(shard),
                    shard_idx: i,
                    query: Arc::clone(&query),
                    k,
                    reply: reply_tx.clone(),
                },
            );
        }
        drop(reply_tx);

        let mut seen: HashMap<u64, f64> = HashMap::new();
        for (_, results) in reply_rx.iter() {
            for r in results {
                upsert_max(&mut seen, r);
            }
        }
        top_k_from_seen(&seen, k)
    }

    /// Batched multi-path search across all shards, merged per query.
    #[must_use]
    pub fn search_multi_path_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
    ) -> Vec<Vec<SearchResult>> {
        let m = queries.len();
        let mut out: Vec<Vec<SearchResult>> = vec![Vec::new(); m];
        if m == 0 || k == 0 {
            return out;
        }
        let (reply_tx, reply_rx) = bounded(self.shards.len());
        let queries: Arc<Vec<Vec<f32>>> = Arc::new(queries.to_vec());
        for (i, shard) in self.shards.iter().enumerate() {
            self.pool.submit(
                i,
                ShardJob::Batch {
                    shard: Arc::clone(shard),
                    shard_idx: i,
                    queries: Arc::clone(&queries),
                    k,
                    reply: reply_tx.clone(),
                },
            );
        }
        drop(reply_tx);

        let shard_results: Vec<Vec<Vec<SearchResult>>> =
            reply_rx.iter().map(|(_, results)| results).collect();

        let mut seen: HashMap<u64, f64> = HashMap::new();
        for (qi, slot) in out.iter_mut().enumerate() {
            seen.clear();
            for per_shard in &shard_results {
                if let Some(results) = per_shard.get(qi) {
                    for &r in results {
                        upsert_max(&mut seen, r);
                    }
                }
            }
            *slot = top_k_from_seen(&seen, k);
        }
        out
    }
}

fn upsert_max(seen: &mut HashMap<u64, f64>, r: SearchResult) {
    seen.entry(r.chunk_id)
        .and_modify(|s| {
            if r.score > *s {
                *s = r.score;
            }
        })
        .or_insert(r.score);
}

enum ShardJob {
    Single {
        shard: Arc<Tree>,
        shard_idx: usize,
        query: Arc<Vec<f32>>,
        k: usize,
        reply: Sender<(usize, Vec<SearchResult>)>,
    },
    Batch {
        shard: Arc<Tree>,
        shard_idx: usize,
        queries: Arc<Vec<Vec<f32>>>,
        k: usize,
        reply: Sender<(usize, Vec<Vec<SearchResult>>)>,
    },
}

/// Resident worker pool with one channel per worker; jobs route by shard
/// index so one shard's queries stay on one worker (and its scratch).
struct ShardPool {
    chans: Vec<Sender<ShardJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl ShardPool {
    fn new(workers: usize, queue_cap: usize) -> Self {
        let mut chans = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let (tx, rx) = bounded::<ShardJob>(queue_cap);
            chans.push(tx);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("canopy-shard-{i}"))
                    .spawn(move || worker_loop(&rx))
                    .expect("failed to spawn shard worker"),
            );
        }
        Self {
            chans,
            workers: handles,
        }
    }

    fn submit(&self, shard_idx: usize, job: ShardJob) {
        let idx = shard_idx % self.chans.len();
        let _ = self.chans[idx].send(job);
    }
}

fn worker_loop(rx: &Receiver<ShardJob>) {
    for job in rx.iter() {
        match job {
            ShardJob::Single {
                shard,
                shard_idx,
                query,
                k,
                reply,
            } => {
                let results = shard.search_multi_path(&query, k);
                let _ = reply.send((shard_idx, results));
            }
            ShardJob::Batch {
                shard,
                shard_idx,
                queries,
                k,
                reply,
            } => {
                let results = shard.search_multi_path_batch(&queries, k);
                let _ = reply.send((shard_idx, results));
            }
        }
    }
}

impl Drop for ShardPool {
    fn drop(&mut self) {
        self.chans.clear();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
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

    #[test]
    fn routes_by_chunk_id_mod_shards() {
        let index = ShardedIndex::new(TreeConfig::default(), 4);
        for id in 0..40_u64 {
            assert!(index.add(&one_hot((id % 100) as usize), id));
        }
        let counts = index.vector_counts();
        assert_eq!(counts, vec![10, 10, 10, 10]);
    }

    #[test]
    fn zero_shards_clamps_to_one() {
        let index = ShardedIndex::new(TreeConfig::default(), 0);
        assert_eq!(index.shard_count(), 1);
        assert!(index.add(&one_hot(0), 9));
        assert_eq!(index.vector_counts(), vec![1]);
    }

    #[test]
    fn search_merges_across_shards() {
        let index = ShardedIndex::new(TreeConfig::default(), 3);
        for id in 0..30_u64 {
            index.add(&one_hot(id as usize), id);
        }
        let hits = index.search_multi_path(&one_hot(7), 3);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, 7);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn invalid_inputs_return_empty() {
        let index = ShardedIndex::new(TreeConfig::default(), 2);
        index.add(&one_hot(0), 0);
        assert!(index.search_multi_path(&[0.0; 4], 3).is_empty());
        assert!(index.search_multi_path(&one_hot(0), 0).is_empty());
        assert!(index.search_multi_path_batch(&[], 3).is_empty());
    }
}
