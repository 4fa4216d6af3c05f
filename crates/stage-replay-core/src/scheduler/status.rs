//! Point-in-time snapshot of a scheduler.

use chrono::{DateTime, Utc};
use serde::Serialize;
use timing_store::StageId;

use super::batch::StageProgress;
use super::RunState;

/// Read-only view of scheduler progress, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub state: RunState,
    pub total_released: usize,
    pub total_records: usize,
    /// 0.0..=100.0
    pub percent: f64,
    /// Stages that are partially released
    pub active_stages: Vec<StageProgress>,
    /// First stage with records left to release
    pub current_stage: Option<StageId>,
    pub estimated_seconds_remaining: u64,
    pub interval_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub competitor_count: usize,
    pub stage_count: usize,
}

/// Seconds until everything is released at the mean batch size.
pub(crate) fn estimate_seconds_remaining(remaining: usize, mean_batch: f64, interval_secs: f64) -> u64 {
    if remaining == 0 || mean_batch <= 0.0 {
        return 0;
    }
    let ticks = (remaining as f64 / mean_batch).ceil();
    (ticks * interval_secs).ceil() as u64
}
