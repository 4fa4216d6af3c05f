//! Storage trait definitions for stage replay
//!
//! - `TimingRepository`: source dataset loading and released-record persistence
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided for
//! testing via the `fakes` module; `SurrealTimingRepository` is the SurrealDB
//! backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Event identifier (opaque, usually a UUID string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        EventId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Competitor identifier (race number). Natural order is ascending number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CompetitorId(pub u32);

impl std::fmt::Display for CompetitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage identifier (stage order number as published by the organiser).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StageId(pub u32);

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PS{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Descriptive details about the competitor behind a record.
///
/// Only used when rendering feed rows; scheduling never looks at it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub surname: String,
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub vehicle: Option<String>,
}

/// One competitor's result for one stage.
///
/// Identity is `(competitor, stage)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub competitor: CompetitorId,
    pub stage: StageId,
    /// Elapsed stage time in seconds
    pub elapsed_secs: f64,
    /// Penalty in seconds
    #[serde(default)]
    pub penalty_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverInfo>,
}

impl TimingRecord {
    pub fn new(competitor: u32, stage: u32, elapsed_secs: f64) -> Self {
        Self {
            competitor: CompetitorId(competitor),
            stage: StageId(stage),
            elapsed_secs,
            penalty_secs: 0.0,
            driver: None,
        }
    }

    pub fn with_penalty(mut self, penalty_secs: f64) -> Self {
        self.penalty_secs = penalty_secs;
        self
    }

    pub fn with_driver(mut self, driver: DriverInfo) -> Self {
        self.driver = Some(driver);
        self
    }

    /// The `(competitor, stage)` identity of this record.
    pub fn key(&self) -> (CompetitorId, StageId) {
        (self.competitor, self.stage)
    }
}

/// Descriptive metadata for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub id: EventId,
    pub name: String,
}

/// An event together with its full source dataset.
///
/// This is also the on-disk JSON shape accepted by the CLI importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDataset {
    pub event: EventInfo,
    pub records: Vec<TimingRecord>,
}

// ---------------------------------------------------------------------------
// TimingRepository
// ---------------------------------------------------------------------------

/// Source of replay datasets and sink for released records.
///
/// Guarantees:
/// - `load_records` fails with `NotFound` for unknown events and with
///   `EmptyDataset` when the event has no records.
/// - `persist_record` is an upsert keyed by `(event, competitor, stage)`:
///   persisting the same pair twice overwrites, it never errors on conflict.
#[async_trait]
pub trait TimingRepository: Send + Sync {
    /// Fetch event metadata. Returns `StoreError::NotFound` if absent.
    async fn load_event(&self, event_id: &EventId) -> StoreResult<EventInfo>;

    /// Load every source record for an event.
    async fn load_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>>;

    /// Persist a released record (upsert).
    async fn persist_record(&self, event_id: &EventId, record: &TimingRecord) -> StoreResult<()>;

    /// Records persisted so far for an event, ordered by stage then competitor.
    async fn released_records(&self, event_id: &EventId) -> StoreResult<Vec<TimingRecord>>;
}
