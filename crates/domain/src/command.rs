//! Command handling infrastructure.

use std::marker::PhantomData;

use event_store::{EventStore, EventStoreError, ExpectedVersion, Version};

use crate::aggregate::{Aggregate, load_aggregate};
use crate::error::DomainError;
use crate::event::ContentRepositoryEvent;
use crate::publish::EventsToPublish;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<ContentRepositoryEvent>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Handler for executing commands against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate from the event store
/// 2. Executing the command to produce events
/// 3. Persisting the events under the version the aggregate was loaded at
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance at version 0.
    pub async fn load(&self, id: &A::Id) -> Result<A, DomainError> {
        load_aggregate(&self.store, id).await
    }

    /// Executes a command and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error. A concurrent write to
    /// the aggregate's stream fails the commit with a concurrency conflict.
    pub async fn execute<F>(&self, id: &A::Id, command_fn: F) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<ContentRepositoryEvent>, A::Error>,
        DomainError: From<A::Error>,
    {
        let aggregate = self.load(id).await?;
        self.apply(id, aggregate, command_fn).await
    }

    /// Executes a command only if the aggregate is still at `expected`.
    ///
    /// Used when the decision to run the command was taken on state read
    /// earlier: any write since then fails with a concurrency conflict
    /// instead of being silently overtaken.
    pub async fn execute_at<F>(
        &self,
        id: &A::Id,
        expected: Version,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<ContentRepositoryEvent>, A::Error>,
        DomainError: From<A::Error>,
    {
        let aggregate = self.load(id).await?;
        if aggregate.version() != expected {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: A::stream_name(id),
                expected: ExpectedVersion::Exact(expected),
                actual: aggregate.version(),
            }
            .into());
        }
        self.apply(id, aggregate, command_fn).await
    }

    async fn apply<F>(
        &self,
        id: &A::Id,
        mut aggregate: A,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<ContentRepositoryEvent>, A::Error>,
        DomainError: From<A::Error>,
    {
        let current_version = aggregate.version();
        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let pending = EventsToPublish::from_domain_events(
            A::stream_name(id),
            &events,
            ExpectedVersion::from_version(current_version),
        )?;
        let result = pending.publish(&self.store).await?;

        aggregate.apply_events(&events);
        aggregate.set_version(result.highest_version);

        tracing::debug!(
            aggregate_type = A::aggregate_type(),
            id = ?id,
            events = events.len(),
            version = %result.highest_version,
            "command executed"
        );

        Ok(CommandResult {
            aggregate,
            events,
            new_version: result.highest_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_stream::ContentStream;
    use crate::error::ContentStreamError;
    use crate::event::{ContentStreamWasClosedData, ContentStreamWasCreatedData};
    use common::ContentStreamId;
    use event_store::InMemoryEventStore;

    fn created(id: ContentStreamId) -> ContentRepositoryEvent {
        ContentRepositoryEvent::ContentStreamWasCreated(ContentStreamWasCreatedData {
            content_stream_id: id,
        })
    }

    #[tokio::test]
    async fn execute_creates_aggregate() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, ContentStream> = CommandHandler::new(store);
        let id = ContentStreamId::new();

        let result = handler.execute(&id, |_| Ok(vec![created(id)])).await.unwrap();

        assert_eq!(result.events.len(), 1);
        assert_eq!(result.new_version, Version::first());
        assert_eq!(result.aggregate.id(), Some(id));
    }

    #[tokio::test]
    async fn execute_appends_to_existing_aggregate() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, ContentStream> = CommandHandler::new(store);
        let id = ContentStreamId::new();

        handler.execute(&id, |_| Ok(vec![created(id)])).await.unwrap();
        let result = handler
            .execute(&id, |_| {
                Ok(vec![ContentRepositoryEvent::ContentStreamWasClosed(
                    ContentStreamWasClosedData {
                        content_stream_id: id,
                    },
                )])
            })
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert!(result.aggregate.is_closed());
    }

    #[tokio::test]
    async fn execute_returns_error_on_rejected_command() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, ContentStream> = CommandHandler::new(store.clone());
        let id = ContentStreamId::new();

        let result = handler
            .execute(&id, |_| Err(ContentStreamError::ContentStreamDoesNotExist(id)))
            .await;

        assert!(matches!(
            result,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamDoesNotExist(_)
            ))
        ));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn execute_at_rejects_aggregate_that_moved_on() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, ContentStream> = CommandHandler::new(store.clone());
        let id = ContentStreamId::new();
        let close = |_: &ContentStream| -> Result<_, ContentStreamError> {
            Ok(vec![ContentRepositoryEvent::ContentStreamWasClosed(
                ContentStreamWasClosedData {
                    content_stream_id: id,
                },
            )])
        };

        handler.execute(&id, |_| Ok(vec![created(id)])).await.unwrap();
        let result = handler.execute_at(&id, Version::initial(), close).await;

        assert!(matches!(
            result,
            Err(DomainError::EventStore(EventStoreError::ConcurrencyConflict { actual, .. }))
                if actual == Version::first()
        ));
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(store.event_count().await, 1);

        let result = handler.execute_at(&id, Version::first(), close).await.unwrap();
        assert_eq!(result.new_version, Version::new(2));
        assert!(result.aggregate.is_closed());
    }

    #[tokio::test]
    async fn empty_events_returns_without_persisting() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, ContentStream> = CommandHandler::new(store.clone());
        let id = ContentStreamId::new();

        let result = handler.execute(&id, |_| Ok(vec![])).await.unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }
}
