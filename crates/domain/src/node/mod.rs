//! Node commands, content graph state and the node command handler.

mod commands;
mod graph;

pub use commands::{
    COMMAND_CLASS_KEY, COMMAND_PAYLOAD_KEY, CreateNodeAggregateWithNode,
    INITIATING_TIMESTAMP_KEY, MoveNodeAggregate, RebasableCommand, RemoveNodeAggregate,
    SetNodeProperties,
};
pub use graph::{ContentGraph, Node, load_content_graph};

use chrono::Utc;
use common::ContentStreamId;
use event_store::{CommitResult, EventStore, ExpectedVersion};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::content_stream::ContentStreamCommandHandler;
use crate::error::DomainError;
use crate::event::ContentRepositoryEvent;
use crate::publish::EventsToPublish;
use crate::workspace::Workspaces;

/// Outcome of a handled node command.
#[derive(Debug, Clone)]
pub struct NodeCommandResult {
    /// The content stream the events were committed to.
    pub content_stream_id: ContentStreamId,

    /// The committed events.
    pub events: Vec<ContentRepositoryEvent>,

    /// Position of the last committed event.
    pub commit: CommitResult,
}

/// Handles node commands against a workspace's current content stream.
pub struct NodeCommandHandler<S: EventStore + Clone> {
    store: S,
    content_streams: ContentStreamCommandHandler<S>,
    workspaces: Workspaces<S>,
}

impl<S: EventStore + Clone> NodeCommandHandler<S> {
    /// Creates a new handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            content_streams: ContentStreamCommandHandler::new(store.clone()),
            workspaces: Workspaces::new(store.clone()),
            store,
        }
    }

    /// Handles a command.
    ///
    /// The events are committed under the exact version the content stream
    /// was read at and record the command in their metadata.
    #[tracing::instrument(skip(self, command), fields(command = command.command_class(), workspace = %command.workspace_name()))]
    pub async fn handle(&self, command: RebasableCommand) -> Result<NodeCommandResult, DomainError> {
        let workspace_name = command.workspace_name();
        let workspace = self.workspaces.load(workspace_name).await?;
        let content_stream_id = workspace.ensure_exists(workspace_name)?;

        let content_stream = self.content_streams.load(content_stream_id).await?;
        content_stream.ensure_writable(content_stream_id)?;

        let graph = load_content_graph(&self.store, content_stream_id).await?;
        let events = command.handle(&graph, content_stream_id)?;

        let metadata = command.to_metadata(Utc::now())?;
        let causation_id = Uuid::new_v4().to_string();
        let commit = EventsToPublish::for_command(
            content_stream_id,
            &events,
            &metadata,
            &causation_id,
            ExpectedVersion::from_version(content_stream.version()),
        )?
        .publish(&self.store)
        .await?;

        metrics::counter!("node_commands_handled_total", "command" => command.command_class())
            .increment(1);

        Ok(NodeCommandResult {
            content_stream_id,
            events,
            commit,
        })
    }
}
