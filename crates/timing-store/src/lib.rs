//! Timing-Store: persistence for stage replay
//!
//! This crate owns the timing record types and all I/O with the backing
//! store: loading an event's source dataset and persisting records as the
//! replay releases them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `TimingRepository`: async trait the replay core talks to
//! - `MemoryTimingRepository`: in-memory fake with failure injection
//! - `SurrealTimingRepository`: SurrealDB backend (in-memory, URL or cloud)

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod schema;
pub mod storage_traits;

pub use error::StoreError;
pub use fakes::MemoryTimingRepository;
pub use handle::{CloudConfig, SurrealTimingRepository};
pub use storage_traits::{
    CompetitorId, DriverInfo, EventDataset, EventId, EventInfo, StageId, StoreResult,
    TimingRecord, TimingRepository,
};

/// Result type for timing-store operations
pub type Result<T> = std::result::Result<T, StoreError>;
