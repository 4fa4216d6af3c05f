//! Error types for timing-store

use thiserror::Error;

/// Errors that can occur in the timing persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// The event (or its dataset) does not exist
    #[error("Event not found: {event_id}")]
    NotFound { event_id: String },

    /// The event exists but has no timing records
    #[error("Event {event_id} has no timing records")]
    EmptyDataset { event_id: String },

    /// A released record could not be written downstream
    #[error("Failed to persist competitor {competitor} stage {stage}: {reason}")]
    Persist {
        competitor: u32,
        stage: u32,
        reason: String,
    },

    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
