use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::{EventEnvelope, EventStoreError, NewEvent, Result, SequenceNumber, StreamName, Version};

/// The version a stream must be at for a commit to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// No check is performed (use with caution).
    Any,
    /// The stream must not contain any events yet.
    NoStream,
    /// The stream must contain at least one event.
    StreamExists,
    /// The stream must be exactly at this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Expects the stream to be at `version`; version 0 means "no stream".
    pub fn from_version(version: Version) -> Self {
        if version == Version::initial() {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// Checks the current version of a stream against this expectation.
    pub fn matches(&self, actual: Version) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == Version::initial(),
            ExpectedVersion::StreamExists => actual > Version::initial(),
            ExpectedVersion::Exact(expected) => *expected == actual,
        }
    }
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any version"),
            ExpectedVersion::NoStream => f.write_str("no stream"),
            ExpectedVersion::StreamExists => f.write_str("an existing stream"),
            ExpectedVersion::Exact(version) => write!(f, "version {version}"),
        }
    }
}

/// Position of the last event written by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResult {
    /// Version of the stream after the commit.
    pub highest_version: Version,
    /// Sequence number of the last committed event.
    pub highest_sequence_number: SequenceNumber,
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
///
/// The store is an append-only log. Every event belongs to exactly one
/// stream, carries a per-stream version and a global sequence number.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Commits events to a stream.
    ///
    /// Events are committed atomically - either all succeed or none do.
    /// Fails with `ConcurrencyConflict` if the stream is not at `expected`.
    async fn commit(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult>;

    /// Loads all events of a stream, in version order.
    async fn load(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>>;

    /// Loads the events of every stream of a category, in sequence order.
    async fn load_category(&self, category: &str) -> Result<Vec<EventEnvelope>>;

    /// Streams the global log starting at `from` (inclusive), in sequence order.
    async fn stream_all(&self, from: SequenceNumber) -> Result<EventStream>;

    /// Gets the current version of a stream.
    ///
    /// Returns None if the stream doesn't exist.
    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>>;

    /// Sequence number of the last event in the log; none for an empty log.
    async fn head(&self) -> Result<SequenceNumber>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Commits a single event.
    async fn commit_event(
        &self,
        stream: &StreamName,
        event: NewEvent,
        expected: ExpectedVersion,
    ) -> Result<CommitResult> {
        self.commit(stream, vec![event], expected).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream: &StreamName) -> Result<bool> {
        Ok(self.stream_version(stream).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn commit(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult> {
        (**self).commit(stream, events, expected).await
    }

    async fn load(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>> {
        (**self).load(stream).await
    }

    async fn load_category(&self, category: &str) -> Result<Vec<EventEnvelope>> {
        (**self).load_category(category).await
    }

    async fn stream_all(&self, from: SequenceNumber) -> Result<EventStream> {
        (**self).stream_all(from).await
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>> {
        (**self).stream_version(stream).await
    }

    async fn head(&self) -> Result<SequenceNumber> {
        (**self).head().await
    }
}

/// Validates events before committing.
pub fn validate_events_for_commit(stream: &StreamName, events: &[NewEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::EmptyCommit(stream.clone()));
    }
    Ok(())
}

/// Checks the current version of a stream against the expectation.
pub fn check_expected_version(
    stream: &StreamName,
    expected: ExpectedVersion,
    actual: Version,
) -> Result<()> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(EventStoreError::ConcurrencyConflict {
            stream: stream.clone(),
            expected,
            actual,
        })
    }
}
