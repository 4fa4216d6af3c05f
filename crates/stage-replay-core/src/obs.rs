//! Structured observability hooks for the replay lifecycle.
//!
//! - `replay_span`: run-scoped span carrying the event and run ids
//! - `emit_*`: one `info!`/`warn!` event per lifecycle step, with a stable
//!   `event = "replay.*"` field for log pipelines
//!
//! Verbosity follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::info;

/// Span tagging everything a run does with its event and run ids.
///
/// Attach it to async work with `tracing::Instrument`:
///
/// ```ignore
/// tokio::spawn(ticker.instrument(replay_span("ev-2024-01", &run_id)));
/// ```
pub fn replay_span(event_id: &str, run_id: &str) -> tracing::Span {
    tracing::info_span!("replay.run", event_id = %event_id, run_id = %run_id)
}

pub fn emit_replay_initialized(event_id: &str, run_id: &str, total_records: usize, skipped: usize) {
    info!(
        event = "replay.initialized",
        event_id = %event_id,
        run_id = %run_id,
        total_records = total_records,
        skipped_records = skipped,
    );
}

/// `transition` is the operation name: start, resume, pause, stop, reset.
pub fn emit_state_changed(event_id: &str, transition: &str, state: &str) {
    info!(
        event = "replay.state_changed",
        event_id = %event_id,
        transition = %transition,
        state = %state,
    );
}

pub fn emit_batch_released(event_id: &str, released: usize, total_released: usize, percent: f64) {
    info!(
        event = "replay.batch_released",
        event_id = %event_id,
        released = released,
        total_released = total_released,
        percent = percent,
    );
}

pub fn emit_replay_completed(event_id: &str, total_records: usize, elapsed_ms: u64) {
    info!(
        event = "replay.completed",
        event_id = %event_id,
        total_records = total_records,
        elapsed_ms = elapsed_ms,
    );
}

/// Persisting a released record failed (warning level). The run continues.
pub fn emit_persist_failed(event_id: &str, competitor: u32, stage: u32, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "replay.persist_failed",
        event_id = %event_id,
        competitor = competitor,
        stage = stage,
        error = %error,
    );
}
