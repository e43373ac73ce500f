//! The Pipeline Manager (C10, §4.10): spawns/scales/monitors/terminates
//! workers and tasks, and exposes the admin-facing surface named in §6
//! ("Scheduler API to workers") as plain async methods — the HTTP framing
//! around them is the (out-of-scope) admin surface's job, not ours.

use crate::status::{read_os_resources, worker_inventory, SystemStatus};
use crate::task::{TaskRecord, TaskSnapshot, TaskStatus};
use chrono::Utc;
use regex::Regex;
use sitesearch_broker::QueueBroker;
use sitesearch_clean::converter::DocumentConverter;
use sitesearch_common::config::{CrawlerConfig, WorkerPoolConfig};
use sitesearch_common::model::{CrawlerType, SiteId};
use sitesearch_common::{CoreError, Result};
use sitesearch_crawler::firecrawl::FirecrawlClient;
use sitesearch_crawler::{CrawlTaskConfig, CrawlerWorker, FetchClient};
use sitesearch_index::Indexer;
use sitesearch_storage::Storage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters for a new crawl task, derived from a firing `CrawlPolicy`
/// (§3) and a single `start_url` — the Scheduler creates one task per
/// `start_url` (§4.11).
#[derive(Debug, Clone)]
pub struct CrawlTaskRequest {
    pub site_id: SiteId,
    pub start_url: String,
    pub max_depth: u32,
    pub max_urls: u32,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub crawler_type: CrawlerType,
    pub discover_sitemap: bool,
}

/// Which shared worker pool `adjust_workers` targets (§4.10: "shared
/// components, not crawlers, which are owned by tasks").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedComponent {
    Cleaner,
    Storage,
    Indexer,
    Refresh,
}

impl SharedComponent {
    fn label(self) -> &'static str {
        match self {
            Self::Cleaner => "cleaner",
            Self::Storage => "storage",
            Self::Indexer => "indexer",
            Self::Refresh => "refresh",
        }
    }
}

struct SharedPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

pub struct PipelineManager {
    broker: QueueBroker,
    storage: Storage,
    indexer: Arc<Indexer>,
    converter: Arc<dyn DocumentConverter>,
    firecrawl: Option<Arc<dyn FirecrawlClient>>,
    crawler_config: CrawlerConfig,
    pool_config: WorkerPoolConfig,
    pools: Mutex<HashMap<&'static str, SharedPool>>,
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    monitor: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    crawler_id_seq: AtomicU32,
    started_at: chrono::DateTime<Utc>,
}

impl PipelineManager {
    pub fn new(
        broker: QueueBroker,
        storage: Storage,
        indexer: Arc<Indexer>,
        converter: Arc<dyn DocumentConverter>,
        firecrawl: Option<Arc<dyn FirecrawlClient>>,
        crawler_config: CrawlerConfig,
        pool_config: WorkerPoolConfig,
    ) -> Self {
        Self {
            broker,
            storage,
            indexer,
            converter,
            firecrawl,
            crawler_config,
            pool_config,
            pools: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            monitor: Mutex::new(None),
            crawler_id_seq: AtomicU32::new(0),
            started_at: Utc::now(),
        }
    }

    /// Spawn the fixed startup pool of Cleaner/Storage/Indexer/Refresh
    /// workers (§4.10 "Spawn a fixed pool ... at startup").
    pub async fn start_shared_pools(&self) {
        self.start_pool(SharedComponent::Cleaner, self.pool_config.cleaner_workers).await;
        self.start_pool(SharedComponent::Storage, self.pool_config.storage_workers).await;
        self.start_pool(SharedComponent::Indexer, self.pool_config.indexer_workers).await;
        self.start_pool(SharedComponent::Refresh, self.pool_config.refresh_workers).await;
    }

    async fn start_pool(&self, component: SharedComponent, count: usize) {
        let cancel = CancellationToken::new();
        let handles = self.spawn_n(component, count, &cancel);
        self.pools.lock().await.insert(component.label(), SharedPool { handles, cancel });
    }

    fn spawn_n(&self, component: SharedComponent, count: usize, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        match component {
            SharedComponent::Cleaner => {
                sitesearch_workers::spawn_cleaner_pool(&self.broker, &self.converter, &n_copy(&self.pool_config, count, component), cancel)
            }
            SharedComponent::Storage => {
                sitesearch_workers::spawn_storage_pool(&self.broker, &self.storage, &n_copy(&self.pool_config, count, component), cancel)
            }
            SharedComponent::Indexer => {
                sitesearch_workers::spawn_indexer_pool(&self.broker, &self.indexer, &self.storage, &n_copy(&self.pool_config, count, component), cancel)
            }
            SharedComponent::Refresh => {
                sitesearch_workers::spawn_refresh_pool(&self.broker, &self.storage, &n_copy(&self.pool_config, count, component), cancel)
            }
        }
    }

    /// `adjust_workers(component, target_count)` (§6, §4.10): replaces the
    /// named shared pool with a freshly sized one. Existing workers finish
    /// their in-flight batch (cancellation is cooperative, checked between
    /// batches by `run_worker_loop`) before the old pool's handles are
    /// dropped.
    pub async fn adjust_workers(&self, component: SharedComponent, target_count: usize) {
        let mut pools = self.pools.lock().await;
        if let Some(old) = pools.remove(component.label()) {
            old.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        let handles = self.spawn_n(component, target_count, &cancel);
        pools.insert(component.label(), SharedPool { handles, cancel });
        info!(component = component.label(), target_count, "adjusted shared worker pool");
    }

    fn next_crawler_id(&self) -> String {
        format!("crawler-{}", self.crawler_id_seq.fetch_add(1, Ordering::SeqCst))
    }

    fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
        patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| CoreError::Config(format!("invalid pattern {p:?}: {e}"))))
            .collect()
    }

    /// `create_crawl_task` (§6): allocates a fresh `task_id`, spawns
    /// `crawlers_per_task` crawler workers wired to its own input queue,
    /// and seeds the frontier with `start_url` (§4.5 `seed`). The
    /// `firecrawl` crawler type instead runs a single whole-site fan-out
    /// job (§9 Open Question 2).
    pub async fn create_crawl_task(&self, req: CrawlTaskRequest) -> Result<Uuid> {
        let task_id = Uuid::new_v4();
        let fetch = FetchClient::new(&self.crawler_config)?;
        let config = CrawlTaskConfig {
            task_id,
            site_id: req.site_id.clone(),
            max_depth: req.max_depth,
            max_urls: req.max_urls,
            include_patterns: Self::compile_patterns(&req.include_patterns)?,
            exclude_patterns: Self::compile_patterns(&req.exclude_patterns)?,
            crawler_id: self.next_crawler_id(),
            discover_sitemap: true,
        };

        let handles = if req.crawler_type == CrawlerType::Firecrawl {
            self.spawn_firecrawl_task(config.clone(), fetch, req.start_url.clone())?
        } else {
            self.spawn_httpx_task(config, fetch, req.start_url.clone()).await?
        };

        let record = TaskRecord {
            task_id,
            site_id: req.site_id,
            input_queue_key: sitesearch_broker::keys::task_input_queue(&task_id.to_string()),
            crawled_set_key: sitesearch_broker::keys::crawled_urls(&sitesearch_broker::keys::task_input_queue(&task_id.to_string())),
            crawler_handles: handles,
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
        };
        self.tasks.lock().await.insert(task_id, record);
        Ok(task_id)
    }

    /// `create_crawl_update_task` (§6): like `create_crawl_task`, but the
    /// task's frontier starts empty — the Refresh Worker (§4.9) supplies
    /// URLs into it after the fact, rather than the Manager seeding a
    /// single `start_url` up front.
    pub async fn create_crawl_update_task(&self, site_id: SiteId, max_urls: u32) -> Result<Uuid> {
        let task_id = Uuid::new_v4();
        let fetch = FetchClient::new(&self.crawler_config)?;
        let config = CrawlTaskConfig {
            task_id,
            site_id: site_id.clone(),
            max_depth: u32::MAX,
            max_urls,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            crawler_id: self.next_crawler_id(),
            discover_sitemap: false,
        };

        let worker = Arc::new(CrawlerWorker::new(self.broker.clone(), self.storage.clone(), fetch, config));
        let workers: Vec<_> = (0..self.pool_config.crawlers_per_task).map(|_| worker.clone()).collect();
        let handle = tokio::spawn(sitesearch_crawler::worker::run_pool(workers, 6));

        let record = TaskRecord {
            task_id,
            site_id,
            input_queue_key: sitesearch_broker::keys::task_input_queue(&task_id.to_string()),
            crawled_set_key: sitesearch_broker::keys::crawled_urls(&sitesearch_broker::keys::task_input_queue(&task_id.to_string())),
            crawler_handles: vec![handle],
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
        };
        self.tasks.lock().await.insert(task_id, record);
        Ok(task_id)
    }

    async fn spawn_httpx_task(&self, config: CrawlTaskConfig, fetch: FetchClient, start_url: String) -> Result<Vec<JoinHandle<()>>> {
        let worker = Arc::new(CrawlerWorker::new(self.broker.clone(), self.storage.clone(), fetch, config));
        worker.seed(&[start_url]).await?;
        let workers: Vec<_> = (0..self.pool_config.crawlers_per_task).map(|_| worker.clone()).collect();
        Ok(vec![tokio::spawn(sitesearch_crawler::worker::run_pool(workers, 6))])
    }

    fn spawn_firecrawl_task(&self, config: CrawlTaskConfig, fetch: FetchClient, start_url: String) -> Result<Vec<JoinHandle<()>>> {
        let Some(firecrawl) = self.firecrawl.clone() else {
            return Err(CoreError::Config("crawler_type=firecrawl requires a configured firecrawl endpoint".to_string()));
        };
        let worker = CrawlerWorker::new(self.broker.clone(), self.storage.clone(), fetch, config);
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run_firecrawl_site(firecrawl.as_ref(), &start_url).await {
                warn!(error = %e, "firecrawl task failed");
            }
        });
        Ok(vec![handle])
    }

    /// `stop_task` (§6, §4.10 "Cancellation"): aborts the task's crawler
    /// handles (the in-process stand-in for SIGTERM-then-SIGKILL against
    /// OS processes — see SPEC_FULL.md §4.10) and deletes its input queue.
    pub async fn stop_task(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let Some(record) = tasks.get_mut(&task_id) else {
            return Err(CoreError::MissingField(format!("unknown task {task_id}")));
        };
        for handle in &record.crawler_handles {
            handle.abort();
        }
        self.broker.delete_keys(&[record.input_queue_key.clone()]).await?;
        record.status = TaskStatus::Stopped;
        record.end_time = Some(Utc::now());
        Ok(())
    }

    async fn snapshot(&self, record: &TaskRecord) -> TaskSnapshot {
        let pending = self.broker.raw_queue_len(&record.input_queue_key).await.unwrap_or(0);
        let processed = self.broker.set_cardinality(&record.crawled_set_key).await.unwrap_or(0);
        TaskSnapshot {
            task_id: record.task_id,
            site_id: record.site_id.clone(),
            crawler_count: record.crawler_handles.len(),
            status: record.status,
            start_time: record.start_time,
            end_time: record.end_time,
            pending,
            processed_urls: processed,
        }
    }

    pub async fn get_task_status(&self, task_id: Uuid) -> Result<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        let record = tasks.get(&task_id).ok_or_else(|| CoreError::MissingField(format!("unknown task {task_id}")))?;
        Ok(self.snapshot(record).await)
    }

    pub async fn get_all_tasks_status(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        let mut out = Vec::with_capacity(tasks.len());
        for record in tasks.values() {
            out.push(self.snapshot(record).await);
        }
        out
    }

    /// `get_system_status` (§4.10).
    pub async fn get_system_status(&self) -> Result<SystemStatus> {
        let os = read_os_resources();
        let pools = self.pools.lock().await;
        let mut workers = Vec::new();
        for (label, pool) in pools.iter() {
            let alive = pool.handles.iter().filter(|h| !h.is_finished()).count();
            workers.push(worker_inventory(label, alive, self.started_at, &os));
        }
        drop(pools);

        let mut queues = Vec::new();
        for q in ["crawler", "cleaner", "storage", "refresh"] {
            queues.push(self.broker.metrics(q).await?);
        }

        Ok(SystemStatus {
            workers,
            queues,
            tasks: self.get_all_tasks_status().await,
            os,
        })
    }

    /// `start_monitoring` (§4.10): spawns the completion-detection loop at
    /// `monitor_interval_secs`.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut guard = self.monitor.lock().await;
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let this = self.clone();
        let interval = std::time::Duration::from_secs(self.pool_config.monitor_interval_secs.max(1));
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = loop_cancel.cancelled() => break,
                }
                this.sweep_completed_tasks().await;
            }
        });
        *guard = Some((handle, cancel));
    }

    pub async fn stop_monitoring(&self) {
        if let Some((handle, cancel)) = self.monitor.lock().await.take() {
            cancel.cancel();
            handle.abort();
        }
    }

    /// "Completion detection" (§4.10): a task is `completed` when none of
    /// its crawler handles are alive and its input queue is empty. On
    /// completion, drop its ephemeral broker keys.
    async fn sweep_completed_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        for record in tasks.values_mut() {
            if record.status != TaskStatus::Running {
                continue;
            }
            if record.crawlers_alive() {
                continue;
            }
            let pending = self.broker.raw_queue_len(&record.input_queue_key).await.unwrap_or(-1);
            if pending == 0 {
                record.status = TaskStatus::Completed;
                record.end_time = Some(Utc::now());
                let _ = self
                    .broker
                    .delete_keys(&[
                        record.input_queue_key.clone(),
                        record.crawled_set_key.clone(),
                        sitesearch_broker::keys::last_activity(&record.task_id.to_string()),
                        sitesearch_broker::keys::processing_times(&record.task_id.to_string()),
                    ])
                    .await;
                info!(task_id = %record.task_id, "task completed");
            }
        }
    }

    /// Graceful shutdown (§4.10): stop the monitor, stop every task, stop
    /// every shared pool, then drop their ephemeral broker keys.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;

        let task_ids: Vec<Uuid> = self.tasks.lock().await.keys().copied().collect();
        for task_id in task_ids {
            let _ = self.stop_task(task_id).await;
        }

        let mut pools = self.pools.lock().await;
        for (_, pool) in pools.drain() {
            pool.cancel.cancel();
            for handle in pool.handles {
                let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
            }
        }
        info!("pipeline manager shut down");
    }
}

fn n_copy(base: &WorkerPoolConfig, count: usize, component: SharedComponent) -> WorkerPoolConfig {
    let mut cfg = base.clone();
    match component {
        SharedComponent::Cleaner => cfg.cleaner_workers = count,
        SharedComponent::Storage => cfg.storage_workers = count,
        SharedComponent::Indexer => cfg.indexer_workers = count,
        SharedComponent::Refresh => cfg.refresh_workers = count,
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            cleaner_workers: 1,
            storage_workers: 1,
            indexer_workers: 1,
            refresh_workers: 1,
            crawlers_per_task: 4,
            claim_batch_size: 8,
            monitor_interval_secs: 10,
        }
    }

    #[test]
    fn n_copy_only_touches_the_targeted_component() {
        let base = base_pool_config();

        let cleaner = n_copy(&base, 5, SharedComponent::Cleaner);
        assert_eq!(cleaner.cleaner_workers, 5);
        assert_eq!(cleaner.storage_workers, base.storage_workers);

        let indexer = n_copy(&base, 7, SharedComponent::Indexer);
        assert_eq!(indexer.indexer_workers, 7);
        assert_eq!(indexer.cleaner_workers, base.cleaner_workers);

        let refresh = n_copy(&base, 0, SharedComponent::Refresh);
        assert_eq!(refresh.refresh_workers, 0);
    }

    #[test]
    fn shared_component_labels_are_stable() {
        assert_eq!(SharedComponent::Cleaner.label(), "cleaner");
        assert_eq!(SharedComponent::Storage.label(), "storage");
        assert_eq!(SharedComponent::Indexer.label(), "indexer");
        assert_eq!(SharedComponent::Refresh.label(), "refresh");
    }

    #[test]
    fn compile_patterns_rejects_invalid_regex() {
        assert!(PipelineManager::compile_patterns(&["valid.*".to_string()]).is_ok());
        assert!(PipelineManager::compile_patterns(&["(unclosed".to_string()]).is_err());
    }
}
