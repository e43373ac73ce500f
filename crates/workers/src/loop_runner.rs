//! The `claim_batch -> spawn -> gather -> ack` shape shared by the
//! cleaner, storage, indexer, and refresh workers (§4.6-§4.9).

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sitesearch_broker::QueueBroker;
use sitesearch_common::error::WorkerFailure;
use sitesearch_common::model::Envelope;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub type EnvelopeHandler<T> =
    Arc<dyn Fn(Envelope<T>) -> BoxFuture<'static, Result<(), WorkerFailure>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    pub queue: String,
    pub batch_size: usize,
    pub idle_poll_interval: Duration,
}

/// Run one worker's main loop until `cancel` fires. Each claimed envelope
/// is handled on its own Tokio task; the batch is gathered before the next
/// `claim_batch` call, matching the source system's per-batch coroutine
/// group (§9 "Coroutine control flow").
pub async fn run_worker_loop<T>(
    broker: QueueBroker,
    config: WorkerLoopConfig,
    handler: EnvelopeHandler<T>,
    cancel: CancellationToken,
) where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let batch = match broker.claim_batch::<T>(&config.queue, config.batch_size).await {
            Ok(b) => b,
            Err(e) => {
                error!(queue = %config.queue, error = %e, "failed to claim batch");
                tokio::select! {
                    _ = tokio::time::sleep(config.idle_poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(config.idle_poll_interval) => {}
                _ = cancel.cancelled() => break,
            }
            continue;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for envelope in batch {
            let broker = broker.clone();
            let queue = config.queue.clone();
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let for_ack = envelope.clone();
                match handler(envelope).await {
                    Ok(()) => {
                        if let Err(e) = broker.ack_success(&queue, &for_ack, started.elapsed()).await {
                            error!(queue = %queue, error = %e, "ack_success failed");
                        }
                    }
                    Err(WorkerFailure::Skip(reason)) => {
                        warn!(queue = %queue, reason, "worker skipped envelope");
                        if let Err(e) = broker.ack_skip(&queue, &for_ack).await {
                            error!(queue = %queue, error = %e, "ack_skip failed");
                        }
                    }
                    Err(WorkerFailure::Fail(core_err)) => {
                        error!(queue = %queue, error = %core_err, "worker failed envelope");
                        if let Err(e) = broker.ack_failure(&queue, &for_ack, &core_err.to_string()).await {
                            error!(queue = %queue, error = %e, "ack_failure failed");
                        }
                    }
                }
            }));
        }
        futures::future::join_all(handles).await;
    }
}
