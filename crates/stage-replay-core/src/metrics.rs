//! Process-wide replay counters.
//!
//! Incremented silently at the call site; [`Metrics::flush`] emits the
//! current values as a single `tracing::info!` event (e.g. when a run
//! completes or the controller shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    batches_released: AtomicU64,
    records_released: AtomicU64,
    persist_failures: AtomicU64,
    runs_completed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            batches_released: AtomicU64::new(0),
            records_released: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
        }
    }

    /// Count one non-empty batch of `records` records.
    pub fn record_batch(&self, records: usize) {
        self.batches_released.fetch_add(1, Ordering::Relaxed);
        self.records_released
            .fetch_add(records as u64, Ordering::Relaxed);
        tracing::trace!(metric = "batches_released", records, "counter incremented");
    }

    pub fn inc_persist_failures(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "persist_failures", "counter incremented");
    }

    pub fn inc_runs_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_completed", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            batches_released = self.batches_released(),
            records_released = self.records_released(),
            persist_failures = self.persist_failures(),
            runs_completed = self.runs_completed(),
        );
    }

    pub fn batches_released(&self) -> u64 {
        self.batches_released.load(Ordering::Relaxed)
    }

    pub fn records_released(&self) -> u64 {
        self.records_released.load(Ordering::Relaxed)
    }

    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.batches_released.store(0, Ordering::Relaxed);
        self.records_released.store(0, Ordering::Relaxed);
        self.persist_failures.store(0, Ordering::Relaxed);
        self.runs_completed.store(0, Ordering::Relaxed);
    }
}
