use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, NewEvent, Result, SequenceNumber, StreamName, Version,
    store::{
        CommitResult, EventStore, EventStream, ExpectedVersion, check_expected_version,
        validate_events_for_commit,
    },
};

/// In-memory event store implementation.
///
/// Stores the whole log in a vector; the index of an event plus one is its
/// sequence number. Provides the same interface as the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }
}

fn current_version(log: &[EventEnvelope], stream: &StreamName) -> Version {
    log.iter()
        .filter(|e| &e.stream_name == stream)
        .map(|e| e.version)
        .max()
        .unwrap_or(Version::initial())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(stream = %stream, events = events.len()))]
    async fn commit(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult> {
        validate_events_for_commit(stream, &events)?;

        let mut log = self.events.write().await;
        let mut version = current_version(&log, stream);
        check_expected_version(stream, expected, version)?;

        let committed = events.len() as u64;
        let mut sequence_number = SequenceNumber::new(log.len() as i64);
        for event in events {
            version = version.next();
            sequence_number = sequence_number.next();
            log.push(EventEnvelope::recorded(
                event,
                stream.clone(),
                version,
                sequence_number,
            ));
        }

        metrics::counter!("event_store_events_committed_total").increment(committed);

        Ok(CommitResult {
            highest_version: version,
            highest_sequence_number: sequence_number,
        })
    }

    async fn load(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>> {
        let log = self.events.read().await;
        Ok(log
            .iter()
            .filter(|e| &e.stream_name == stream)
            .cloned()
            .collect())
    }

    async fn load_category(&self, category: &str) -> Result<Vec<EventEnvelope>> {
        let log = self.events.read().await;
        Ok(log
            .iter()
            .filter(|e| e.stream_name.category() == category)
            .cloned()
            .collect())
    }

    async fn stream_all(&self, from: SequenceNumber) -> Result<EventStream> {
        use futures_util::stream;

        let log = self.events.read().await;
        let events: Vec<_> = log
            .iter()
            .filter(|e| e.sequence_number >= from)
            .cloned()
            .collect();

        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>> {
        let log = self.events.read().await;
        Ok(log
            .iter()
            .filter(|e| &e.stream_name == stream)
            .map(|e| e.version)
            .max())
    }

    async fn head(&self) -> Result<SequenceNumber> {
        let log = self.events.read().await;
        Ok(log
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or_else(SequenceNumber::none))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventStoreError, EventStoreExt};

    fn create_test_event(event_type: &str) -> NewEvent {
        NewEvent::builder()
            .event_type(event_type)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn commit_single_event() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("Test:a");

        let result = store
            .commit(&stream, vec![create_test_event("E1")], ExpectedVersion::NoStream)
            .await
            .unwrap();
        assert_eq!(result.highest_version, Version::first());
        assert_eq!(result.highest_sequence_number, SequenceNumber::first());

        let events = store.load(&stream).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_name, stream);
    }

    #[tokio::test]
    async fn versions_are_per_stream_and_sequence_numbers_global() {
        let store = InMemoryEventStore::new();
        let a = StreamName::new("Test:a");
        let b = StreamName::new("Test:b");

        store
            .commit(
                &a,
                vec![create_test_event("E1"), create_test_event("E2")],
                ExpectedVersion::NoStream,
            )
            .await
            .unwrap();
        let result = store
            .commit(&b, vec![create_test_event("E3")], ExpectedVersion::NoStream)
            .await
            .unwrap();

        assert_eq!(result.highest_version, Version::first());
        assert_eq!(result.highest_sequence_number, SequenceNumber::new(3));
        assert_eq!(store.head().await.unwrap(), SequenceNumber::new(3));
        assert_eq!(store.stream_version(&a).await.unwrap(), Some(Version::new(2)));
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("Test:a");

        store
            .commit_event(&stream, create_test_event("E1"), ExpectedVersion::NoStream)
            .await
            .unwrap();

        let result = store
            .commit_event(&stream, create_test_event("E2"), ExpectedVersion::NoStream)
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::first()
        ));

        let result = store
            .commit_event(
                &stream,
                create_test_event("E2"),
                ExpectedVersion::Exact(Version::first()),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn stream_exists_expectation() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("Test:a");

        let result = store
            .commit_event(&stream, create_test_event("E1"), ExpectedVersion::StreamExists)
            .await;
        assert!(result.unwrap_err().is_conflict());
        assert!(!store.stream_exists(&stream).await.unwrap());
    }

    #[tokio::test]
    async fn failed_commit_leaves_log_untouched() {
        let store = InMemoryEventStore::new();
        let stream = StreamName::new("Test:a");

        let result = store.commit(&stream, vec![], ExpectedVersion::Any).await;
        assert!(matches!(result, Err(EventStoreError::EmptyCommit(_))));
        assert_eq!(store.event_count().await, 0);
        assert_eq!(store.head().await.unwrap(), SequenceNumber::none());
    }

    #[tokio::test]
    async fn load_category_filters_by_prefix() {
        let store = InMemoryEventStore::new();
        for name in ["Workspace:live", "ContentStream:x", "Workspace:user"] {
            store
                .commit_event(
                    &StreamName::new(name),
                    create_test_event("E"),
                    ExpectedVersion::Any,
                )
                .await
                .unwrap();
        }

        let workspaces = store.load_category("Workspace").await.unwrap();
        assert_eq!(workspaces.len(), 2);
        assert!(workspaces[0].sequence_number < workspaces[1].sequence_number);
    }

    #[tokio::test]
    async fn stream_all_starts_at_sequence_number() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        let stream = StreamName::new("Test:a");
        let events = (0..5).map(|i| create_test_event(&format!("E{i}"))).collect();
        store
            .commit(&stream, events, ExpectedVersion::Any)
            .await
            .unwrap();

        let tail: Vec<_> = store
            .stream_all(SequenceNumber::new(3))
            .await
            .unwrap()
            .collect()
            .await;
        let sequence_numbers: Vec<i64> = tail
            .into_iter()
            .map(|e| e.unwrap().sequence_number.as_i64())
            .collect();
        assert_eq!(sequence_numbers, vec![3, 4, 5]);
    }
}
