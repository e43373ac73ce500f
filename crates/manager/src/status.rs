//! `get_system_status` (§4.10): per-component worker inventories, queue
//! metrics, per-task snapshots, and a broker/OS resource summary.
//!
//! SPEC_FULL.md §4.10 resolves the "PID, RSS, CPU%" field shape for a
//! single-binary Tokio realization: there is one real OS process, so every
//! worker inventory entry shares that process's `sysinfo` snapshot and is
//! distinguished by its own start time/uptime instead of a distinct PID.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sitesearch_broker::metrics::QueueMetrics;
use sysinfo::{Pid, System};

use crate::task::TaskSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerInventoryEntry {
    pub component: String,
    pub count: usize,
    pub pid: u32,
    pub rss_bytes: u64,
    pub cpu_percent: f32,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OsResourceSummary {
    pub pid: u32,
    pub rss_bytes: u64,
    pub cpu_percent: f32,
    pub total_memory_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub workers: Vec<WorkerInventoryEntry>,
    pub queues: Vec<QueueMetrics>,
    pub tasks: Vec<TaskSnapshot>,
    pub os: OsResourceSummary,
}

/// One fresh reading of this process's own resource usage, grounded on the
/// `sysinfo::System::new_all()` + `refresh_process` idiom used for RSS/CPU
/// reporting across the pack (`examples/Alb-O-xeno`,
/// `examples/meilisearch-meilisearch`).
pub fn read_os_resources() -> OsResourceSummary {
    let mut system = System::new_all();
    system.refresh_all();
    let pid = Pid::from_u32(std::process::id());
    let (rss_bytes, cpu_percent) = system
        .process(pid)
        .map(|p| (p.memory(), p.cpu_usage()))
        .unwrap_or((0, 0.0));

    OsResourceSummary {
        pid: std::process::id(),
        rss_bytes,
        cpu_percent,
        total_memory_bytes: system.total_memory(),
    }
}

pub fn worker_inventory(component: &str, count: usize, started_at: DateTime<Utc>, os: &OsResourceSummary) -> WorkerInventoryEntry {
    WorkerInventoryEntry {
        component: component.to_string(),
        count,
        pid: os.pid,
        rss_bytes: os.rss_bytes,
        cpu_percent: os.cpu_percent,
        uptime_secs: (Utc::now() - started_at).num_seconds().max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_os_resources_reports_the_current_pid() {
        let os = read_os_resources();
        assert_eq!(os.pid, std::process::id());
    }

    #[test]
    fn worker_inventory_computes_nonnegative_uptime() {
        let os = OsResourceSummary { pid: 1, rss_bytes: 1024, cpu_percent: 2.5, total_memory_bytes: 4096 };
        let started_at = Utc::now() - chrono::Duration::seconds(30);
        let entry = worker_inventory("cleaner", 3, started_at, &os);
        assert_eq!(entry.component, "cleaner");
        assert_eq!(entry.count, 3);
        assert_eq!(entry.pid, 1);
        assert!(entry.uptime_secs >= 29);
    }

    #[test]
    fn worker_inventory_clamps_future_start_time_to_zero() {
        let os = OsResourceSummary { pid: 1, rss_bytes: 0, cpu_percent: 0.0, total_memory_bytes: 0 };
        let started_at = Utc::now() + chrono::Duration::seconds(60);
        let entry = worker_inventory("storage", 0, started_at, &os);
        assert_eq!(entry.uptime_secs, 0);
    }
}
