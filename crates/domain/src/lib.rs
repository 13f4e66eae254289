//! Domain layer of the content repository.
//!
//! This crate provides:
//! - The content repository events as one tagged union
//! - Aggregate trait and CommandHandler for event-sourced entities
//! - Content stream and workspace aggregates with their lifecycle
//! - Rebaseable node commands and the content graph they operate on

pub mod aggregate;
pub mod command;
pub mod content_stream;
pub mod error;
pub mod event;
pub mod node;
pub mod publish;
pub mod workspace;

pub use aggregate::{Aggregate, load_aggregate};
pub use command::{CommandHandler, CommandResult};
pub use content_stream::{
    ContentStream, ContentStreamCommandHandler, ContentStreamState, ForkPoint,
};
pub use error::{
    ContentStreamError, DomainError, NodeCommandError, Result, WorkspaceLifecycleError,
};
pub use event::{ContentRepositoryEvent, PropertyValues};
pub use node::{
    ContentGraph, CreateNodeAggregateWithNode, MoveNodeAggregate, Node, NodeCommandHandler,
    NodeCommandResult, RebasableCommand, RemoveNodeAggregate, SetNodeProperties,
    load_content_graph,
};
pub use publish::EventsToPublish;
pub use workspace::{Workspace, WorkspaceDescription, WorkspaceStatus, Workspaces};
