//! Error taxonomy for the replay core.

use timing_store::StoreError;

use crate::scheduler::RunState;

/// Errors produced by replay control operations.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("event not found: {0}")]
    NotFound(String),

    #[error("event {0} has no timing records")]
    EmptyDataset(String),

    #[error("cannot {operation} while replay is {state}")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    #[error("persist failed: {0}")]
    Persist(String),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ReplayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { event_id } => ReplayError::NotFound(event_id),
            StoreError::EmptyDataset { event_id } => ReplayError::EmptyDataset(event_id),
            err @ StoreError::Persist { .. } => ReplayError::Persist(err.to_string()),
            other => ReplayError::Store(other),
        }
    }
}

impl ReplayError {
    pub(crate) fn invalid(operation: &'static str, state: RunState) -> Self {
        ReplayError::InvalidState { operation, state }
    }
}

/// Result type for replay operations.
pub type ReplayResult<T> = std::result::Result<T, ReplayError>;
