use serde::{Deserialize, Serialize};

/// `{pending, processing, completed, failed, avg_processing_time,
/// last_activity}` per §4.1 `metrics(Q)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueMetrics {
    pub queue: String,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_processing_time_secs: f64,
    pub last_activity: Option<i64>,
}
