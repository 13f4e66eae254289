//! Core aggregate trait.

use event_store::{EventEnvelope, EventStore, StreamName, Version};

use crate::error::DomainError;
use crate::event::ContentRepositoryEvent;

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying the events of their stream
/// - Decide on new events from commands
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The identity of one aggregate instance.
    type Id: Send + Sync + std::fmt::Debug;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Returns the stream holding the events of the aggregate.
    fn stream_name(id: &Self::Id) -> StreamName;

    /// Returns the current version of the aggregate.
    ///
    /// Version starts at 0 for a new aggregate and increments with each event.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic and must not fail: events
    /// represent facts that have happened. Events the aggregate does not care
    /// about are ignored.
    fn apply(&mut self, event: &ContentRepositoryEvent);

    /// Applies multiple events in sequence.
    fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a ContentRepositoryEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Rebuilds an aggregate from the recorded events of its stream.
    fn from_envelopes(envelopes: &[EventEnvelope]) -> Result<Self, serde_json::Error> {
        let mut aggregate = Self::default();
        for envelope in envelopes {
            let event = ContentRepositoryEvent::from_envelope(envelope)?;
            aggregate.apply(&event);
            aggregate.set_version(envelope.version);
        }
        Ok(aggregate)
    }
}

/// Loads an aggregate from the event store.
///
/// If the aggregate doesn't exist, returns a default instance at version 0.
pub async fn load_aggregate<A, S>(store: &S, id: &A::Id) -> Result<A, DomainError>
where
    A: Aggregate,
    S: EventStore + ?Sized,
{
    let events = store.load(&A::stream_name(id)).await?;
    Ok(A::from_envelopes(&events)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ContentStreamWasClosedData, ContentStreamWasCreatedData};
    use common::ContentStreamId;
    use event_store::{NewEvent, SequenceNumber};

    #[derive(Debug, Default)]
    struct CountingAggregate {
        closed: usize,
        other: usize,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("test error")]
    struct TestError;

    impl Aggregate for CountingAggregate {
        type Id = String;
        type Error = TestError;

        fn aggregate_type() -> &'static str {
            "Counting"
        }

        fn stream_name(id: &String) -> StreamName {
            StreamName::new(format!("Counting:{id}"))
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: &ContentRepositoryEvent) {
            match event {
                ContentRepositoryEvent::ContentStreamWasClosed(_) => self.closed += 1,
                _ => self.other += 1,
            }
        }
    }

    fn recorded(event: &ContentRepositoryEvent, version: i64) -> EventEnvelope {
        let new_event: NewEvent = event.to_event_builder().unwrap().build();
        EventEnvelope::recorded(
            new_event,
            CountingAggregate::stream_name(&"a".to_string()),
            Version::new(version),
            SequenceNumber::new(version),
        )
    }

    #[test]
    fn from_envelopes_folds_events_and_tracks_version() {
        let id = ContentStreamId::new();
        let created = ContentRepositoryEvent::ContentStreamWasCreated(
            ContentStreamWasCreatedData {
                content_stream_id: id,
            },
        );
        let closed =
            ContentRepositoryEvent::ContentStreamWasClosed(ContentStreamWasClosedData {
                content_stream_id: id,
            });

        let aggregate =
            CountingAggregate::from_envelopes(&[recorded(&created, 1), recorded(&closed, 2)])
                .unwrap();

        assert_eq!(aggregate.closed, 1);
        assert_eq!(aggregate.other, 1);
        assert_eq!(aggregate.version(), Version::new(2));
    }

    #[test]
    fn apply_events_in_sequence() {
        let id = ContentStreamId::new();
        let closed =
            ContentRepositoryEvent::ContentStreamWasClosed(ContentStreamWasClosedData {
                content_stream_id: id,
            });

        let mut aggregate = CountingAggregate::default();
        aggregate.apply_events([&closed, &closed]);
        assert_eq!(aggregate.closed, 2);
        assert_eq!(aggregate.version(), Version::initial());
    }
}
