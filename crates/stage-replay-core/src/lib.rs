//! Stage Replay Core
//!
//! Replays a pre-loaded dataset of stage timing records as a progressive
//! live feed: records are released in batches on a timer, stage by stage,
//! with a bounded overlap between adjacent stages.

pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod event_log;
pub mod feed;
pub mod metrics;
pub mod obs;
pub mod ordering;
pub mod scheduler;
pub mod telemetry;

pub use config::{BatchSizing, ReplayConfig, ReplayParams};
pub use controller::{
    InitReport, PauseReport, ReplayController, ReplayStatus, StartReport, StopReport,
};
pub use dataset::{Competitor, DatasetIndex, EmptyDatasetError, Stage};
pub use error::{ReplayError, ReplayResult};
pub use event_log::{EventLog, LogCategory, LogEntry, EVENT_LOG_CAPACITY};
pub use feed::{classification_rows, format_stage_time, ClassificationRow};
pub use metrics::METRICS;
pub use obs::{
    emit_batch_released, emit_persist_failed, emit_replay_completed, emit_replay_initialized,
    emit_state_changed, replay_span,
};
pub use ordering::{perturbed_order, MAX_ORDER_VARIATION};
pub use scheduler::{
    BatchOutcome, ReleaseProgress, ReleaseScheduler, RunState, SchedulerStatus, StageProgress,
    StageRelease, StartOutcome, MAIN_STAGE_SHARE_PERCENT, MAX_CONCURRENT_STAGES,
};

pub use timing_store::{
    CompetitorId, DriverInfo, EventDataset, EventId, EventInfo, StageId, TimingRecord,
    TimingRepository,
};
