//! The Crawler Worker (C5): the full per-envelope procedure of §4.5,
//! steps 1-12, driven off a task's own input queue in the broker.

use crate::extract::{extract_links, extract_metadata};
use crate::fetch::{is_text_mimetype, FetchClient, FetchOutcome};
use crate::firecrawl::{wait_for_crawl, FirecrawlClient, FirecrawlPage};
use crate::normalize::normalize;
use crate::sitemap::discover_sitemap_urls;
use regex::Regex;
use sitesearch_broker::{keys, QueueBroker};
use sitesearch_common::hash::ContentHash;
use sitesearch_common::model::{
    CrawlTaskItem, CrawlerContent, CrawlerOperation, CrawlerOutput, CrawlerType, DocumentMetadata,
    SiteId,
};
use sitesearch_common::{CoreError, Result};
use sitesearch_storage::Storage;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-task crawl parameters, supplied by the Manager from the firing
/// CrawlPolicy (§3 CrawlPolicy, §4.10).
#[derive(Debug, Clone)]
pub struct CrawlTaskConfig {
    pub task_id: Uuid,
    pub site_id: SiteId,
    pub max_depth: u32,
    pub max_urls: u32,
    pub include_patterns: Vec<Regex>,
    pub exclude_patterns: Vec<Regex>,
    pub crawler_id: String,
    pub discover_sitemap: bool,
}

impl CrawlTaskConfig {
    fn link_allowed(&self, url: &str) -> bool {
        let included = self.include_patterns.is_empty() || self.include_patterns.iter().any(|p| p.is_match(url));
        let excluded = self.exclude_patterns.iter().any(|p| p.is_match(url));
        included && !excluded
    }
}

/// Outcome of processing a single input-queue item, surfaced to the
/// worker's main loop for logging/metrics.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    Skipped,
    QueueEmpty,
}

pub struct CrawlerWorker {
    broker: QueueBroker,
    storage: Storage,
    fetch: FetchClient,
    config: CrawlTaskConfig,
}

impl CrawlerWorker {
    pub fn new(broker: QueueBroker, storage: Storage, fetch: FetchClient, config: CrawlTaskConfig) -> Self {
        Self { broker, storage, fetch, config }
    }

    fn input_queue_key(&self) -> String {
        keys::task_input_queue(&self.config.task_id.to_string())
    }

    fn crawled_set_key(&self) -> String {
        keys::crawled_urls(&self.input_queue_key())
    }

    /// Seed the task's frontier with its start URLs and, if enabled,
    /// whatever sitemap discovery turns up (§4.5 "Sitemap discovery").
    pub async fn seed(&self, start_urls: &[String]) -> Result<()> {
        for url in start_urls {
            self.push_frontier(url, 0).await?;
        }
        if self.config.discover_sitemap {
            if let Some(base) = start_urls.first() {
                match discover_sitemap_urls(&self.fetch, base).await {
                    Ok(urls) => {
                        for url in urls {
                            self.push_frontier(&url, 0).await?;
                        }
                    }
                    Err(e) => warn!(error = %e, "sitemap discovery failed, continuing with start URLs only"),
                }
            }
        }
        Ok(())
    }

    async fn push_frontier(&self, url: &str, depth: u32) -> Result<()> {
        let item = CrawlTaskItem {
            url: normalize(url),
            site_id: self.config.site_id.clone(),
            task_id: self.config.task_id,
            depth,
            timestamp: chrono::Utc::now().timestamp(),
        };
        let body = serde_json::to_string(&item)?;
        self.broker.push_raw(&self.input_queue_key(), &body).await
    }

    /// Process exactly one item from the task's input queue, or report
    /// that the queue was empty. This is the unit the worker's main loop
    /// calls in a tight `loop { }`.
    #[instrument(skip(self))]
    pub async fn process_one(&self) -> Result<ProcessOutcome> {
        let Some(raw) = self.broker.pop_raw(&self.input_queue_key()).await? else {
            return Ok(ProcessOutcome::QueueEmpty);
        };
        let item: CrawlTaskItem = match serde_json::from_str(&raw) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "malformed frontier entry, discarding");
                return Ok(ProcessOutcome::Skipped);
            }
        };

        match self.process_item(item).await {
            Ok(outcome) => Ok(outcome),
            Err(CoreError::Other(_)) | Err(CoreError::Http(_)) => Ok(ProcessOutcome::Skipped),
            Err(e) => Err(e),
        }
    }

    async fn process_item(&self, item: CrawlTaskItem) -> Result<ProcessOutcome> {
        let url = normalize(&item.url);

        // Step 2: dedup.
        if self.broker.set_contains(&self.crawled_set_key(), &url).await? {
            debug!(url, "already crawled, skipping");
            return Ok(ProcessOutcome::Skipped);
        }

        // Step 3: limit.
        let crawled_count = self.broker.set_cardinality(&self.crawled_set_key()).await?;
        if crawled_count >= self.config.max_urls as i64 {
            info!(task_id = %self.config.task_id, "max_urls reached, clearing frontier");
            self.broker.delete_keys(&[self.input_queue_key()]).await?;
            return Ok(ProcessOutcome::Skipped);
        }

        // §8 property 7: every fetched URL has depth <= max_depth.
        if item.depth > self.config.max_depth {
            return Ok(ProcessOutcome::Skipped);
        }

        // Step 4: prefetch existence check (short-circuits nothing about
        // whether to fetch — the fetched hash is unknown until after the
        // fetch — but its `exists` flag feeds the 5xx delete decision).
        let (previously_known, _, _) = self
            .storage
            .check_exists(&url, &self.config.site_id, None)
            .await?;

        // Step 5: fetch.
        let outcome = self.fetch.fetch(&url).await?;
        self.broker.set_add(&self.crawled_set_key(), &url).await?; // step 12

        match outcome {
            // §7 "HTTP 4xx/5xx": either class is a SkipError at the
            // crawler; a previously-known URL additionally gets a
            // synthetic delete envelope (§8 scenario S5 exercises this for
            // a 404 specifically, not just 5xx).
            FetchOutcome::ClientError { status_code } | FetchOutcome::ServerError { status_code } => {
                if previously_known {
                    self.emit_delete(&url, status_code).await?;
                } else {
                    debug!(url, status_code, "error response on unknown URL, skipping");
                }
                Ok(ProcessOutcome::Skipped)
            }
            FetchOutcome::Ok(resp) => {
                self.handle_success(&url, item.depth, resp).await?;
                Ok(ProcessOutcome::Processed)
            }
        }
    }

    async fn handle_success(
        &self,
        url: &str,
        depth: u32,
        resp: crate::fetch::FetchResponse,
    ) -> Result<()> {
        let is_text = is_text_mimetype(&resp.mimetype);
        let content_hash = ContentHash::of(&resp.body).to_hex();

        let (content, links, metadata) = if is_text {
            let text = String::from_utf8_lossy(&resp.body).into_owned();
            let (links, metadata) = if resp.mimetype == "text/html" || resp.mimetype == "application/xhtml+xml" {
                let links = extract_links(url, &text);
                let metadata = extract_metadata(url, &text);
                (links, metadata)
            } else {
                (Vec::new(), DocumentMetadata::default())
            };
            (CrawlerContent::Text(text), links, metadata)
        } else {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&resp.body);
            (CrawlerContent::Base64Binary(encoded), Vec::new(), DocumentMetadata::default())
        };

        // Step 10: BFS enqueue of allowed, not-yet-crawled links.
        for link in &links {
            if !self.config.link_allowed(link) {
                continue;
            }
            if self.broker.set_contains(&self.crawled_set_key(), link).await? {
                continue;
            }
            self.push_frontier(link, depth + 1).await?;
        }

        let output = CrawlerOutput {
            url: url.to_string(),
            site_id: self.config.site_id.clone(),
            content,
            mimetype: resp.mimetype,
            links,
            metadata,
            content_hash,
            status_code: resp.status_code,
            crawler_id: self.config.crawler_id.clone(),
            crawler_type: CrawlerType::Httpx,
            timestamp: chrono::Utc::now().timestamp(),
            crawler_operation: None,
        };

        // Step 11: emit downstream.
        self.broker.enqueue_with_id("crawler", self.config.task_id, output).await?;
        Ok(())
    }

    /// The `firecrawl` crawler-type path (§6 "LLM-driven crawler",
    /// §9 Open Question 2): rather than walking a BFS frontier, kick off a
    /// whole-site `crawl_url` job and fan every returned page out as its
    /// own envelope onto `queue:crawler`, so the shared Cleaner/Storage/
    /// Indexer pools parallelize over them exactly as they would a
    /// regular BFS crawl's output.
    #[instrument(skip(self, client))]
    pub async fn run_firecrawl_site(&self, client: &dyn FirecrawlClient, start_url: &str) -> Result<usize> {
        let job_id = client.crawl_url(start_url).await?;
        let pages = wait_for_crawl(
            client,
            &job_id,
            std::time::Duration::from_secs(5),
            120,
        )
        .await?;

        let mut emitted = 0;
        for page in pages {
            let url = page.url.clone().unwrap_or_else(|| start_url.to_string());
            let url = normalize(&url);
            if self.broker.set_contains(&self.crawled_set_key(), &url).await? {
                continue;
            }
            if self.broker.set_cardinality(&self.crawled_set_key()).await? >= self.config.max_urls as i64 {
                break;
            }
            self.emit_firecrawl_page(&url, &page).await?;
            self.broker.set_add(&self.crawled_set_key(), &url).await?;
            emitted += 1;
        }
        Ok(emitted)
    }

    async fn emit_firecrawl_page(&self, url: &str, page: &FirecrawlPage) -> Result<()> {
        let markdown = page.markdown.clone().unwrap_or_default();
        let content_hash = ContentHash::of(markdown.as_bytes()).to_hex();
        let metadata = DocumentMetadata {
            title: page.title.clone(),
            description: page.description.clone(),
            ..Default::default()
        };

        let output = CrawlerOutput {
            url: url.to_string(),
            site_id: self.config.site_id.clone(),
            content: CrawlerContent::Text(markdown),
            mimetype: "text/markdown".to_string(),
            links: page.links.clone(),
            metadata,
            content_hash,
            status_code: 200,
            crawler_id: self.config.crawler_id.clone(),
            crawler_type: CrawlerType::Firecrawl,
            timestamp: chrono::Utc::now().timestamp(),
            crawler_operation: None,
        };
        self.broker.enqueue_with_id("crawler", self.config.task_id, output).await
    }

    async fn emit_delete(&self, url: &str, status_code: u16) -> Result<()> {
        let output = CrawlerOutput {
            url: url.to_string(),
            site_id: self.config.site_id.clone(),
            content: CrawlerContent::Text(String::new()),
            mimetype: String::new(),
            links: Vec::new(),
            metadata: DocumentMetadata::default(),
            content_hash: String::new(),
            status_code,
            crawler_id: self.config.crawler_id.clone(),
            crawler_type: CrawlerType::Httpx,
            timestamp: chrono::Utc::now().timestamp(),
            crawler_operation: Some(CrawlerOperation::Delete),
        };
        self.broker.enqueue_with_id("crawler", self.config.task_id, output).await
    }
}

/// Run a pool of `n` crawler workers (one Tokio task each) against the
/// same task input queue until it drains and stays empty for a poll
/// cycle, mirroring §9 "Coroutine control flow"'s `claim -> spawn -> gather`
/// shape, scaled up to a whole pool rather than a single batch.
pub async fn run_pool(workers: Vec<Arc<CrawlerWorker>>, idle_polls_before_stop: u32) {
    let mut handles = Vec::new();
    for worker in workers {
        handles.push(tokio::spawn(async move {
            let mut idle_rounds = 0;
            loop {
                match worker.process_one().await {
                    Ok(ProcessOutcome::QueueEmpty) => {
                        idle_rounds += 1;
                        if idle_rounds >= idle_polls_before_stop {
                            break;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }
                    Ok(_) => idle_rounds = 0,
                    Err(e) => {
                        warn!(error = %e, "crawler worker error processing item");
                        idle_rounds = 0;
                    }
                }
            }
        }));
    }
    futures::future::join_all(handles).await;
}
