//! Pending writes.
//!
//! Command handlers and the workspace coordinator decide on events without
//! touching the store. They return [`EventsToPublish`], which the caller
//! commits in one place.

use common::ContentStreamId;
use event_store::{
    CommitResult, EventMetadata, EventStore, ExpectedVersion, NewEvent, StreamName,
};

use crate::event::ContentRepositoryEvent;

/// A batch of events to commit to one stream under an expected version.
#[derive(Debug, Clone)]
pub struct EventsToPublish {
    /// The stream the events go to.
    pub stream: StreamName,

    /// The events, in order.
    pub events: Vec<NewEvent>,

    /// The version the stream must be at.
    pub expected_version: ExpectedVersion,
}

impl EventsToPublish {
    /// Creates a batch of pending writes.
    pub fn new(stream: StreamName, events: Vec<NewEvent>, expected_version: ExpectedVersion) -> Self {
        Self {
            stream,
            events,
            expected_version,
        }
    }

    /// Builds pending writes for domain events without command provenance.
    pub fn from_domain_events(
        stream: StreamName,
        events: &[ContentRepositoryEvent],
        expected_version: ExpectedVersion,
    ) -> Result<Self, serde_json::Error> {
        let events = events
            .iter()
            .map(|event| Ok(event.to_event_builder()?.build()))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        Ok(Self::new(stream, events, expected_version))
    }

    /// Builds pending writes for the events of one content stream command.
    ///
    /// Every event carries the command metadata and the command's causation
    /// id, so the command can later be extracted and replayed.
    pub fn for_command(
        content_stream_id: ContentStreamId,
        events: &[ContentRepositoryEvent],
        command_metadata: &EventMetadata,
        causation_id: &str,
        expected_version: ExpectedVersion,
    ) -> Result<Self, serde_json::Error> {
        let events = events
            .iter()
            .map(|event| {
                Ok(event
                    .to_event_builder()?
                    .metadata_map(command_metadata.clone())
                    .causation_id(causation_id)
                    .build())
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        Ok(Self::new(
            StreamName::for_content_stream(content_stream_id),
            events,
            expected_version,
        ))
    }

    /// Returns true if there is nothing to commit.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Commits the events.
    pub async fn publish<S: EventStore + ?Sized>(
        self,
        store: &S,
    ) -> event_store::Result<CommitResult> {
        store
            .commit(&self.stream, self.events, self.expected_version)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{NodeAggregateWasRemovedData, WorkspaceWasRemovedData};
    use common::{NodeAggregateId, WorkspaceName};
    use event_store::{InMemoryEventStore, Version};

    #[test]
    fn for_command_attaches_metadata_and_causation() {
        let content_stream_id = ContentStreamId::new();
        let event = ContentRepositoryEvent::NodeAggregateWasRemoved(NodeAggregateWasRemovedData {
            content_stream_id,
            node_aggregate_id: NodeAggregateId::new("n1"),
        });
        let metadata = EventMetadata::from([(
            "commandClass".to_string(),
            serde_json::json!("RemoveNodeAggregate"),
        )]);

        let pending = EventsToPublish::for_command(
            content_stream_id,
            &[event],
            &metadata,
            "command-1",
            ExpectedVersion::Exact(Version::first()),
        )
        .unwrap();

        assert_eq!(
            pending.stream,
            StreamName::for_content_stream(content_stream_id)
        );
        assert_eq!(pending.events.len(), 1);
        assert_eq!(pending.events[0].causation_id.as_deref(), Some("command-1"));
        assert_eq!(
            pending.events[0].metadata.get("commandClass"),
            Some(&serde_json::json!("RemoveNodeAggregate"))
        );
    }

    #[tokio::test]
    async fn publish_commits_under_expected_version() {
        let store = InMemoryEventStore::new();
        let name = WorkspaceName::new("user");
        let event = ContentRepositoryEvent::WorkspaceWasRemoved(WorkspaceWasRemovedData {
            workspace_name: name.clone(),
        });

        let pending = EventsToPublish::from_domain_events(
            StreamName::for_workspace(&name),
            &[event],
            ExpectedVersion::Exact(Version::new(3)),
        )
        .unwrap();
        assert!(!pending.is_empty());

        let result = pending.publish(&store).await;
        assert!(result.unwrap_err().is_conflict());
    }
}
