//! The Pipeline Manager (C10): launches, scales, monitors, and terminates
//! workers and tasks, and exposes the system status surface of §4.10.

pub mod manager;
pub mod status;
pub mod task;

pub use manager::{CrawlTaskRequest, PipelineManager, SharedComponent};
pub use status::{OsResourceSummary, SystemStatus, WorkerInventoryEntry};
pub use task::{TaskSnapshot, TaskStatus};
