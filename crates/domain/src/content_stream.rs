//! Content stream aggregate and lifecycle commands.
//!
//! A content stream is one branch's history of content changes. It is either
//! created empty or forked off another stream at a given version, in which
//! case it sees the source's events up to that version followed by its own.

use common::ContentStreamId;
use event_store::{EventStore, StreamName, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::{ContentStreamError, DomainError};
use crate::event::{
    ContentRepositoryEvent, ContentStreamWasClosedData, ContentStreamWasCreatedData,
    ContentStreamWasForkedData, ContentStreamWasRemovedData, ContentStreamWasReopenedData,
};
use crate::workspace::Workspaces;

/// Lifecycle state of a content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContentStreamState {
    /// Accepts writes.
    #[default]
    Open,
    /// Temporarily rejects writes, e.g. while being rebased or published.
    Closed,
    /// Retired; rejects all writes for good.
    Removed,
}

impl std::fmt::Display for ContentStreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentStreamState::Open => write!(f, "Open"),
            ContentStreamState::Closed => write!(f, "Closed"),
            ContentStreamState::Removed => write!(f, "Removed"),
        }
    }
}

/// Where a forked content stream branched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkPoint {
    pub source_content_stream_id: ContentStreamId,
    pub version_of_source_content_stream: Version,
}

/// Content stream aggregate root.
#[derive(Debug, Clone, Default)]
pub struct ContentStream {
    id: Option<ContentStreamId>,
    state: ContentStreamState,
    fork_point: Option<ForkPoint>,
    version: Version,
}

impl Aggregate for ContentStream {
    type Id = ContentStreamId;
    type Error = ContentStreamError;

    fn aggregate_type() -> &'static str {
        "ContentStream"
    }

    fn stream_name(id: &ContentStreamId) -> StreamName {
        StreamName::for_content_stream(*id)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &ContentRepositoryEvent) {
        match event {
            ContentRepositoryEvent::ContentStreamWasCreated(data) => {
                self.id = Some(data.content_stream_id);
                self.state = ContentStreamState::Open;
            }
            ContentRepositoryEvent::ContentStreamWasForked(data) => {
                self.id = Some(data.new_content_stream_id);
                self.state = ContentStreamState::Open;
                self.fork_point = Some(ForkPoint {
                    source_content_stream_id: data.source_content_stream_id,
                    version_of_source_content_stream: data.version_of_source_content_stream,
                });
            }
            ContentRepositoryEvent::ContentStreamWasClosed(_) => {
                self.state = ContentStreamState::Closed;
            }
            ContentRepositoryEvent::ContentStreamWasReopened(_) => {
                self.state = ContentStreamState::Open;
            }
            ContentRepositoryEvent::ContentStreamWasRemoved(_) => {
                self.state = ContentStreamState::Removed;
            }
            // Content changes only move the version forward.
            _ => {}
        }
    }
}

// Query methods
impl ContentStream {
    /// Returns the content stream id; `None` if the stream does not exist.
    pub fn id(&self) -> Option<ContentStreamId> {
        self.id
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ContentStreamState {
        self.state
    }

    /// Returns where the stream was forked off, if it was forked.
    pub fn fork_point(&self) -> Option<ForkPoint> {
        self.fork_point
    }

    /// Returns true if the stream exists.
    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    /// Returns true if the stream is closed.
    pub fn is_closed(&self) -> bool {
        self.state == ContentStreamState::Closed
    }

    /// Fails unless the stream exists and accepts writes.
    pub fn ensure_writable(&self, id: ContentStreamId) -> Result<(), ContentStreamError> {
        self.ensure_exists(id)?;
        match self.state {
            ContentStreamState::Open => Ok(()),
            ContentStreamState::Closed => Err(ContentStreamError::ContentStreamIsClosed(id)),
            ContentStreamState::Removed => Err(ContentStreamError::ContentStreamIsRemoved(id)),
        }
    }

    fn ensure_exists(&self, id: ContentStreamId) -> Result<(), ContentStreamError> {
        if self.exists() {
            Ok(())
        } else {
            Err(ContentStreamError::ContentStreamDoesNotExist(id))
        }
    }
}

// Command methods (return events)
impl ContentStream {
    /// Creates an empty content stream.
    pub fn create(
        &self,
        id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, ContentStreamError> {
        if self.exists() {
            return Err(ContentStreamError::ContentStreamAlreadyExists(id));
        }

        Ok(vec![ContentRepositoryEvent::ContentStreamWasCreated(
            ContentStreamWasCreatedData {
                content_stream_id: id,
            },
        )])
    }

    /// Forks this (new) stream off `source` at `source_version`.
    pub fn fork(
        &self,
        id: ContentStreamId,
        source_content_stream_id: ContentStreamId,
        source_version: Version,
    ) -> Result<Vec<ContentRepositoryEvent>, ContentStreamError> {
        if self.exists() {
            return Err(ContentStreamError::ContentStreamAlreadyExists(id));
        }

        Ok(vec![ContentRepositoryEvent::ContentStreamWasForked(
            ContentStreamWasForkedData {
                new_content_stream_id: id,
                source_content_stream_id,
                version_of_source_content_stream: source_version,
            },
        )])
    }

    /// Stops the stream from accepting writes.
    pub fn close(
        &self,
        id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, ContentStreamError> {
        self.ensure_writable(id)?;

        Ok(vec![ContentRepositoryEvent::ContentStreamWasClosed(
            ContentStreamWasClosedData {
                content_stream_id: id,
            },
        )])
    }

    /// Lets a closed stream accept writes again; a no-op for an open stream.
    pub fn reopen(
        &self,
        id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, ContentStreamError> {
        self.ensure_exists(id)?;
        match self.state {
            ContentStreamState::Open => Ok(vec![]),
            ContentStreamState::Closed => Ok(vec![ContentRepositoryEvent::ContentStreamWasReopened(
                ContentStreamWasReopenedData {
                    content_stream_id: id,
                },
            )]),
            ContentStreamState::Removed => Err(ContentStreamError::ContentStreamIsRemoved(id)),
        }
    }

    /// Retires the stream.
    pub fn remove(
        &self,
        id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, ContentStreamError> {
        self.ensure_exists(id)?;
        if self.state == ContentStreamState::Removed {
            return Err(ContentStreamError::ContentStreamIsRemoved(id));
        }

        Ok(vec![ContentRepositoryEvent::ContentStreamWasRemoved(
            ContentStreamWasRemovedData {
                content_stream_id: id,
            },
        )])
    }
}

/// Service for the content stream lifecycle.
pub struct ContentStreamCommandHandler<S: EventStore + Clone> {
    handler: CommandHandler<S, ContentStream>,
}

impl<S: EventStore + Clone> ContentStreamCommandHandler<S> {
    /// Creates a new handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Loads a content stream.
    pub async fn load(&self, id: ContentStreamId) -> Result<ContentStream, DomainError> {
        self.handler.load(&id).await
    }

    /// Loads a content stream, failing unless it exists.
    pub async fn load_existing(&self, id: ContentStreamId) -> Result<ContentStream, DomainError> {
        let content_stream = self.load(id).await?;
        if !content_stream.exists() {
            return Err(ContentStreamError::ContentStreamDoesNotExist(id).into());
        }
        Ok(content_stream)
    }

    /// Creates an empty content stream.
    #[tracing::instrument(skip(self))]
    pub async fn create_content_stream(
        &self,
        id: ContentStreamId,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        self.handler.execute(&id, |cs| cs.create(id)).await
    }

    /// Forks a new content stream off `source` at its version `source_version`.
    ///
    /// Nothing is copied; the fork only records its ancestry. The new stream
    /// must not exist yet.
    #[tracing::instrument(skip(self))]
    pub async fn fork_content_stream(
        &self,
        id: ContentStreamId,
        source: ContentStreamId,
        source_version: Version,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        let source_stream = self.load_existing(source).await?;
        if source_stream.state() == ContentStreamState::Removed {
            return Err(ContentStreamError::ContentStreamIsRemoved(source).into());
        }

        self.handler
            .execute(&id, |cs| cs.fork(id, source, source_version))
            .await
    }

    /// Closes a content stream.
    #[tracing::instrument(skip(self))]
    pub async fn close_content_stream(
        &self,
        id: ContentStreamId,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        self.handler
            .execute(&id, |cs| cs.close(id))
            .await
    }

    /// Closes a content stream if nothing was written to it since `version`.
    #[tracing::instrument(skip(self))]
    pub async fn close_content_stream_at(
        &self,
        id: ContentStreamId,
        version: Version,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        self.handler
            .execute_at(&id, version, |cs| cs.close(id))
            .await
    }

    /// Reopens a closed content stream.
    #[tracing::instrument(skip(self))]
    pub async fn reopen_content_stream(
        &self,
        id: ContentStreamId,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        self.handler
            .execute(&id, |cs| cs.reopen(id))
            .await
    }

    /// Removes a content stream no workspace points at anymore.
    #[tracing::instrument(skip(self))]
    pub async fn remove_content_stream(
        &self,
        id: ContentStreamId,
    ) -> Result<CommandResult<ContentStream>, DomainError> {
        let workspaces = Workspaces::new(self.handler.store().clone());
        if let Some(workspace) = workspaces.find_by_content_stream_id(id).await?
            && let Some(workspace_name) = workspace.name()
        {
            return Err(ContentStreamError::ContentStreamStillInUse {
                content_stream_id: id,
                workspace_name: workspace_name.clone(),
            }
            .into());
        }

        self.handler
            .execute(&id, |cs| cs.remove(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{EventStore, InMemoryEventStore};

    fn handler() -> (InMemoryEventStore, ContentStreamCommandHandler<InMemoryEventStore>) {
        let store = InMemoryEventStore::new();
        (store.clone(), ContentStreamCommandHandler::new(store))
    }

    #[tokio::test]
    async fn create_and_close_content_stream() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        let result = handler.close_content_stream(id).await.unwrap();

        assert!(result.aggregate.is_closed());
        assert!(matches!(
            result.aggregate.ensure_writable(id),
            Err(ContentStreamError::ContentStreamIsClosed(closed)) if closed == id
        ));
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        let result = handler.create_content_stream(id).await;

        assert!(matches!(
            result,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamAlreadyExists(_)
            ))
        ));
    }

    #[tokio::test]
    async fn closing_a_closed_stream_fails_fast() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        handler.close_content_stream(id).await.unwrap();
        let result = handler.close_content_stream(id).await;

        assert!(matches!(
            result,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamIsClosed(_)
            ))
        ));
    }

    #[tokio::test]
    async fn close_at_stale_version_conflicts_and_keeps_stream_open() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        let result = handler.close_content_stream_at(id, Version::initial()).await;

        assert!(result.unwrap_err().is_conflict());
        let stream = handler.load_existing(id).await.unwrap();
        assert_eq!(stream.state(), ContentStreamState::Open);

        let closed = handler
            .close_content_stream_at(id, Version::first())
            .await
            .unwrap();
        assert!(closed.aggregate.is_closed());
    }

    #[tokio::test]
    async fn reopen_restores_writes() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        handler.close_content_stream(id).await.unwrap();
        let result = handler.reopen_content_stream(id).await.unwrap();

        assert_eq!(result.aggregate.state(), ContentStreamState::Open);
        assert!(result.aggregate.ensure_writable(id).is_ok());

        let again = handler.reopen_content_stream(id).await.unwrap();
        assert!(again.events.is_empty());
    }

    #[tokio::test]
    async fn fork_records_ancestry_as_first_event() {
        let (store, handler) = handler();
        let source = ContentStreamId::new();
        let fork = ContentStreamId::new();

        handler.create_content_stream(source).await.unwrap();
        let result = handler
            .fork_content_stream(fork, source, Version::first())
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::first());
        assert_eq!(
            result.aggregate.fork_point(),
            Some(ForkPoint {
                source_content_stream_id: source,
                version_of_source_content_stream: Version::first(),
            })
        );

        let again = handler
            .fork_content_stream(fork, source, Version::first())
            .await;
        assert!(again.is_err());
        assert_eq!(
            store
                .stream_version(&StreamName::for_content_stream(fork))
                .await
                .unwrap(),
            Some(Version::first())
        );
    }

    #[tokio::test]
    async fn fork_of_missing_source_fails() {
        let (_, handler) = handler();
        let missing = ContentStreamId::new();

        let result = handler
            .fork_content_stream(ContentStreamId::new(), missing, Version::initial())
            .await;

        assert!(matches!(
            result,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamDoesNotExist(id)
            )) if id == missing
        ));
    }

    #[tokio::test]
    async fn removed_stream_rejects_writes() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        handler.create_content_stream(id).await.unwrap();
        let result = handler.remove_content_stream(id).await.unwrap();
        assert_eq!(result.aggregate.state(), ContentStreamState::Removed);

        let close = handler.close_content_stream(id).await;
        assert!(matches!(
            close,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamIsRemoved(_)
            ))
        ));
    }

    #[tokio::test]
    async fn missing_stream_reports_its_id() {
        let (_, handler) = handler();
        let id = ContentStreamId::new();

        let result = handler.close_content_stream(id).await;
        assert!(matches!(
            result,
            Err(DomainError::ContentStream(
                ContentStreamError::ContentStreamDoesNotExist(missing)
            )) if missing == id
        ));
    }
}
