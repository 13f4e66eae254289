//! Subscription error types.

use thiserror::Error;

use crate::subscription::SubscriptionId;

/// Errors raised by a projection or a catch-up hook.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Failed to deserialize an event payload.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// A database error inside the projection's own storage.
    #[error("Projection database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A projection-specific error.
    #[error("Projection error: {0}")]
    Projection(String),
}

impl ProjectionError {
    /// Creates a projection-specific error.
    pub fn new(message: impl Into<String>) -> Self {
        ProjectionError::Projection(message.into())
    }
}

/// Errors of the subscription store.
#[derive(Debug, Error)]
pub enum SubscriptionStoreError {
    /// The subscription was never added.
    #[error("Subscription not found: {0}")]
    NotFound(SubscriptionId),

    /// A subscription with this id was already added.
    #[error("Subscription already exists: {0}")]
    AlreadyExists(SubscriptionId),

    /// A persisted status could not be parsed.
    #[error("Invalid subscription status: {0}")]
    InvalidStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors that abort a subscription engine operation as a whole.
///
/// Failures of individual subscribers never end up here; they are recorded
/// on the subscription and reported in the [`ProcessedResult`](crate::ProcessedResult).
#[derive(Debug, Error)]
pub enum SubscriptionEngineError {
    /// The batch size must be a positive integer.
    #[error("Invalid batch size {0}, must be at least 1")]
    InvalidBatchSize(usize),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// An error occurred in the subscription store.
    #[error("Subscription store error: {0}")]
    SubscriptionStore(#[from] SubscriptionStoreError),
}

/// Result type for projection and hook operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Result type for subscription engine operations.
pub type EngineResult<T> = std::result::Result<T, SubscriptionEngineError>;
