//! Domain error types.

use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use event_store::EventStoreError;
use thiserror::Error;

/// Errors raised by the content stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentStreamError {
    /// The content stream has no events.
    #[error("Content stream {0} does not exist")]
    ContentStreamDoesNotExist(ContentStreamId),

    /// A content stream with this id already exists.
    #[error("Content stream {0} already exists")]
    ContentStreamAlreadyExists(ContentStreamId),

    /// The content stream is closed and does not accept writes.
    #[error("Content stream {0} is closed")]
    ContentStreamIsClosed(ContentStreamId),

    /// The content stream was removed.
    #[error("Content stream {0} was removed")]
    ContentStreamIsRemoved(ContentStreamId),

    /// A workspace still points at the content stream.
    #[error("Content stream {content_stream_id} is still used by workspace {workspace_name}")]
    ContentStreamStillInUse {
        content_stream_id: ContentStreamId,
        workspace_name: WorkspaceName,
    },
}

/// Errors raised by the workspace lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceLifecycleError {
    /// No workspace with this name exists.
    #[error("Workspace {0} does not exist")]
    WorkspaceDoesNotExist(WorkspaceName),

    /// A workspace with this name already exists.
    #[error("Workspace {0} already exists")]
    WorkspaceAlreadyExists(WorkspaceName),

    /// The base of a new workspace does not exist.
    #[error("Base workspace {0} does not exist")]
    BaseWorkspaceDoesNotExist(WorkspaceName),
}

/// Errors raised when a node command is rejected by the current content.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeCommandError {
    /// The node to create already exists.
    #[error("Node aggregate {0} already exists")]
    NodeAggregateAlreadyExists(NodeAggregateId),

    /// The node does not exist.
    #[error("Node aggregate {0} does not exist")]
    NodeAggregateDoesNotExist(NodeAggregateId),

    /// The requested parent does not exist.
    #[error("Parent node aggregate {0} does not exist")]
    ParentNodeAggregateDoesNotExist(NodeAggregateId),

    /// A node cannot be moved below itself or one of its descendants.
    #[error("Node aggregate {node_aggregate_id} cannot be moved into its descendant {new_parent_node_aggregate_id}")]
    CannotMoveIntoDescendant {
        node_aggregate_id: NodeAggregateId,
        new_parent_node_aggregate_id: NodeAggregateId,
    },
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A content stream rejected the operation.
    #[error("Content stream error: {0}")]
    ContentStream(#[from] ContentStreamError),

    /// A workspace rejected the operation.
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceLifecycleError),

    /// A node command was rejected.
    #[error("Node command error: {0}")]
    NodeCommand(#[from] NodeCommandError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if the operation lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
