//! Single-tree search pool.
//!
//! A bounded set of resident workers funnels multi-path queries into one
//! tree. Callers enqueue a job and block on its completion handle, so at
//! most N block scans (and hence N mmap fault bursts) are in flight no
//! matter how many threads issue queries. Observed effect on mmap-backed
//! trees is a markedly tighter p99.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::node::SearchResult;
use crate::tree::search::SearchScratch;
use crate::tree::TreeCore;

struct SearchJob {
    query: Vec<f32>,
    k: usize,
    reply: Sender<Vec<SearchResult>>,
}

pub(crate) struct SearchPool {
    tx: Option<Sender<SearchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl SearchPool {
    pub(crate) fn new(core: Arc<TreeCore>, workers: usize, queue_cap: usize) -> Self {
        let (tx, rx) = bounded::<SearchJob>(queue_cap);
        let handles = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                let core = Arc::clone(&core);
                std::thread::Builder::new()
                    .name(format!("canopy-search-{i}"))
                    .spawn(move || worker_loop(&core, &rx))
                    .expect("failed to spawn search worker")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers: handles,
        }
    }

    /// Enqueue a query and wait for its result.
    pub(crate) fn search(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        let Some(tx) = &self.tx else {
            return Vec::new();
        };
        let (reply_tx, reply_rx) = bounded(1);
        let job = SearchJob {
            query: query.to_vec(),
            k,
            reply: reply_tx,
        };
        if tx.send(job).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }
}

fn worker_loop(core: &TreeCore, rx: &Receiver<SearchJob>) {
    // Worker-local scratch: grown on demand, never shared.
    let mut scratch = SearchScratch::new();
    for job in rx.iter() {
        let results = core.search_multi_path_impl(&job.query, job.k, &mut scratch);
        let _ = job.reply.send(results);
    }
}

impl Drop for SearchPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker's job iterator.
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
