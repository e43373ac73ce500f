//! Cleaner, Storage, Indexer, and Refresh workers (C6-C9): the shared-pool
//! stages between the crawler and the indexer, plus the refresh fan-out.

pub mod cleaner;
pub mod indexer_worker;
pub mod loop_runner;
pub mod refresh;
pub mod storage_worker;

pub use loop_runner::{run_worker_loop, WorkerLoopConfig};

use sitesearch_broker::QueueBroker;
use sitesearch_clean::converter::DocumentConverter;
use sitesearch_common::config::WorkerPoolConfig;
use sitesearch_index::Indexer;
use sitesearch_storage::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn loop_config(queue: &str, batch_size: usize) -> WorkerLoopConfig {
    WorkerLoopConfig {
        queue: queue.to_string(),
        batch_size,
        idle_poll_interval: Duration::from_millis(500),
    }
}

/// Spawn `count` cleaner workers reading `queue:crawler` (§4.6).
pub fn spawn_cleaner_pool(
    broker: &QueueBroker,
    converter: &Arc<dyn DocumentConverter>,
    pool: &WorkerPoolConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config = loop_config("crawler", pool.claim_batch_size);
    (0..pool.cleaner_workers)
        .map(|_| {
            let handler = cleaner::handler(broker.clone(), converter.clone());
            tokio::spawn(run_worker_loop(broker.clone(), config.clone(), handler, cancel.clone()))
        })
        .collect()
}

/// Spawn `count` storage workers reading `queue:cleaner` (§4.7).
pub fn spawn_storage_pool(
    broker: &QueueBroker,
    storage: &Storage,
    pool: &WorkerPoolConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config = loop_config("cleaner", pool.claim_batch_size);
    (0..pool.storage_workers)
        .map(|_| {
            let handler = storage_worker::handler(broker.clone(), storage.clone());
            tokio::spawn(run_worker_loop(broker.clone(), config.clone(), handler, cancel.clone()))
        })
        .collect()
}

/// Spawn `count` indexer workers reading `queue:storage` (§4.8).
pub fn spawn_indexer_pool(
    broker: &QueueBroker,
    indexer: &Arc<Indexer>,
    storage: &Storage,
    pool: &WorkerPoolConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config = loop_config("storage", pool.claim_batch_size);
    (0..pool.indexer_workers)
        .map(|_| {
            let handler = indexer_worker::handler(indexer.clone(), storage.clone());
            tokio::spawn(run_worker_loop(broker.clone(), config.clone(), handler, cancel.clone()))
        })
        .collect()
}

/// Spawn `count` refresh workers reading `queue:refresh` (§4.9).
pub fn spawn_refresh_pool(
    broker: &QueueBroker,
    storage: &Storage,
    pool: &WorkerPoolConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let config = loop_config("refresh", pool.claim_batch_size);
    (0..pool.refresh_workers)
        .map(|_| {
            let handler = refresh::handler(broker.clone(), storage.clone());
            tokio::spawn(run_worker_loop(broker.clone(), config.clone(), handler, cancel.clone()))
        })
        .collect()
}
