//! Refresh Worker (C9, §4.9): expands a RefreshPolicy into per-URL crawl
//! tasks pushed into the owning task's input queue.

use crate::loop_runner::EnvelopeHandler;
use chrono::Utc;
use futures::FutureExt;
use regex::Regex;
use sitesearch_broker::{keys, QueueBroker};
use sitesearch_common::error::WorkerFailure;
use sitesearch_common::model::{CrawlTaskItem, Envelope, RefreshTask};
use sitesearch_common::{CoreError, Result};
use sitesearch_storage::Storage;
use std::sync::Arc;
use tracing::info;

/// Documents are paged in batches of at most this many rows (§4.9).
const PAGE_SIZE: i64 = 200;

/// Build the `EnvelopeHandler` the loop runner drives for `queue:refresh`.
pub fn handler(broker: QueueBroker, storage: Storage) -> EnvelopeHandler<RefreshTask> {
    Arc::new(move |envelope: Envelope<RefreshTask>| {
        let broker = broker.clone();
        let storage = storage.clone();
        async move {
            process(&broker, &storage, envelope.payload).await.map_err(WorkerFailure::Fail)?;
            Ok(())
        }
        .boxed()
    })
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| CoreError::MissingField(format!("invalid refresh pattern {p}: {e}"))))
        .collect()
}

/// A URL is a refresh candidate when it matches an include pattern (or none
/// are configured), doesn't match an exclude pattern, and — if `max_age_days`
/// is set — has gone stale enough (§9 Open Question resolution, recorded in
/// DESIGN.md: `max_age_days` gates staleness, not recency).
fn is_candidate(url: &str, ts: i64, include: &[Regex], exclude: &[Regex], max_age_days: Option<u32>) -> bool {
    let included = include.is_empty() || include.iter().any(|p| p.is_match(url));
    let excluded = exclude.iter().any(|p| p.is_match(url));
    if !included || excluded {
        return false;
    }
    if let Some(max_age) = max_age_days {
        let age_days = (Utc::now().timestamp() - ts) / 86_400;
        return age_days >= max_age as i64;
    }
    true
}

async fn process(broker: &QueueBroker, storage: &Storage, task: RefreshTask) -> Result<()> {
    let include = compile_patterns(&task.url_patterns)?;
    let exclude = compile_patterns(&task.exclude_patterns)?;
    let queue_key = keys::task_input_queue(&task.crawl_task_id.to_string());

    let mut after_id = 0i64;
    let mut dispatched = 0usize;
    loop {
        let page = storage.list_site_document_urls(&task.site_id, after_id, PAGE_SIZE).await?;
        if page.is_empty() {
            break;
        }
        for (doc_id, url, ts) in &page {
            after_id = *doc_id;
            if !is_candidate(url, *ts, &include, &exclude, task.max_age_days) {
                continue;
            }
            let item = CrawlTaskItem {
                url: url.clone(),
                site_id: task.site_id.clone(),
                task_id: task.crawl_task_id,
                depth: 0,
                timestamp: Utc::now().timestamp(),
            };
            let body = serde_json::to_string(&item)?;
            broker.push_raw(&queue_key, &body).await?;
            dispatched += 1;
        }
        if (page.len() as i64) < PAGE_SIZE {
            break;
        }
    }

    info!(site_id = %task.site_id, dispatched, "refresh task dispatched URLs to crawl queue");

    let now = Utc::now();
    let interval_days = {
        let policy = storage.get_refresh_policy(&task.site_id).await?;
        policy.map(|p| p.refresh_interval_days).unwrap_or(7)
    };
    let next_refresh = now + chrono::Duration::days(interval_days as i64);
    storage.update_refresh_schedule(&task.site_id, now, next_refresh).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_respects_include_and_exclude() {
        let include = compile_patterns(&["^https://a\\.test/docs/".to_string()]).unwrap();
        let exclude = compile_patterns(&["/archive/".to_string()]).unwrap();
        assert!(is_candidate("https://a.test/docs/page", 0, &include, &exclude, None));
        assert!(!is_candidate("https://a.test/blog/page", 0, &include, &exclude, None));
        assert!(!is_candidate("https://a.test/docs/archive/x", 0, &include, &exclude, None));
    }

    #[test]
    fn candidate_honors_max_age_days() {
        let now = Utc::now().timestamp();
        let fresh = now - 86_400; // 1 day old
        let stale = now - 10 * 86_400; // 10 days old
        assert!(!is_candidate("https://a.test/x", fresh, &[], &[], Some(7)));
        assert!(is_candidate("https://a.test/x", stale, &[], &[], Some(7)));
    }
}
