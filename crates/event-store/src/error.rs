use thiserror::Error;

use crate::{ExpectedVersion, StreamName, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream was not at the expected version when committing.
    ///
    /// Callers may retry the whole operation against the new state.
    #[error("Concurrency conflict on stream {stream}: expected {expected}, found version {actual}")]
    ConcurrencyConflict {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: Version,
    },

    /// A commit without any events was attempted.
    #[error("Cannot commit an empty event list to stream {0}")]
    EmptyCommit(StreamName),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true for errors the caller may resolve by retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
