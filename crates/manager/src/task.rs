//! Per-task bookkeeping for the Pipeline Manager (§4.10): the `{task_id,
//! site_id, config, processes, status, start_time, end_time}` record and
//! the crawler handles backing it.

use chrono::{DateTime, Utc};
use sitesearch_common::model::SiteId;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// `starting -> running -> {stopped | completed}` (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Starting,
    Running,
    Stopped,
    Completed,
}

/// A snapshot safe to hand to a status caller (no live `JoinHandle`s).
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub site_id: SiteId,
    pub crawler_count: usize,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub pending: i64,
    pub processed_urls: i64,
}

/// The live record the Manager owns per task. Not `Clone`: a task's
/// `JoinHandle`s are unique, matching the source's one-PID-per-worker
/// bookkeeping (§4.10), realized here with in-process Tokio tasks (§5,
/// SPEC_FULL.md §4.10 note) instead of OS processes.
pub struct TaskRecord {
    pub task_id: Uuid,
    pub site_id: SiteId,
    pub input_queue_key: String,
    pub crawled_set_key: String,
    pub crawler_handles: Vec<JoinHandle<()>>,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// No crawler handle for this task is still running — either they all
    /// finished (frontier drained and stayed empty) or were aborted by
    /// `stop_task` (§4.10 "Completion detection").
    pub fn crawlers_alive(&self) -> bool {
        self.crawler_handles.iter().any(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_record(handles: Vec<JoinHandle<()>>) -> TaskRecord {
        TaskRecord {
            task_id: Uuid::new_v4(),
            site_id: "site_a".to_string(),
            input_queue_key: "queue:task:test".to_string(),
            crawled_set_key: "crawled:task:test".to_string(),
            crawler_handles: handles,
            status: TaskStatus::Running,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    #[tokio::test]
    async fn crawlers_alive_reflects_handle_completion() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        let record = empty_record(vec![handle]);
        assert!(record.crawlers_alive());
        for handle in &record.crawler_handles {
            handle.abort();
        }
        // Give the runtime a tick to observe the abort.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!record.crawlers_alive());
    }

    #[tokio::test]
    async fn crawlers_alive_is_false_with_no_handles() {
        let record = empty_record(vec![]);
        assert!(!record.crawlers_alive());
    }
}
