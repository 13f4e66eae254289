//! Workspace error types.

use common::WorkspaceName;
use domain::{DomainError, RebasableCommand};
use event_store::{EventStoreError, SequenceNumber};
use serde::Serialize;
use thiserror::Error;

/// A command that could not be replayed onto the new base.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandFailure {
    pub command: RebasableCommand,

    /// Position of the first event the command originally produced.
    pub sequence_number: SequenceNumber,

    pub message: String,
}

/// Errors that can occur during workspace operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Replaying the workspace's commands failed.
    #[error("Rebase of workspace {workspace_name} failed: {} command(s) could not be replayed", errors.len())]
    WorkspaceRebaseFailed {
        workspace_name: WorkspaceName,
        errors: Vec<CommandFailure>,
    },

    /// Another writer changed a stream first. The operation may be retried.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(EventStoreError),

    /// A changing event does not record the command that produced it.
    #[error("Event {event_type} at {sequence_number} carries no rebasable command")]
    MissingRebasableCommand {
        event_type: String,
        sequence_number: SequenceNumber,
    },

    /// The operation requires a base workspace.
    #[error("Workspace {0} has no base workspace")]
    WorkspaceHasNoBase(WorkspaceName),

    /// No workspace with this name exists.
    #[error("Workspace {0} not found")]
    WorkspaceNotFound(WorkspaceName),

    /// A workspace with this name already exists.
    #[error("Workspace {0} already exists")]
    WorkspaceAlreadyExists(WorkspaceName),

    /// Other workspaces are still based on the workspace.
    #[error("Workspace {workspace_name} is the base of {dependents:?}")]
    WorkspaceHasDependents {
        workspace_name: WorkspaceName,
        dependents: Vec<WorkspaceName>,
    },

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkspaceError {
    /// Returns true if retrying the operation may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WorkspaceError::ConcurrencyConflict(_))
    }
}

impl From<EventStoreError> for WorkspaceError {
    fn from(error: EventStoreError) -> Self {
        if error.is_conflict() {
            WorkspaceError::ConcurrencyConflict(error)
        } else {
            WorkspaceError::EventStore(error)
        }
    }
}

impl From<DomainError> for WorkspaceError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::EventStore(e) => e.into(),
            DomainError::Serialization(e) => WorkspaceError::Serialization(e),
            other => WorkspaceError::Domain(other),
        }
    }
}

/// Convenience type alias for workspace results.
pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{ExpectedVersion, StreamName, Version};

    fn conflict() -> EventStoreError {
        EventStoreError::ConcurrencyConflict {
            stream: StreamName::new("ContentStream:x"),
            expected: ExpectedVersion::Exact(Version::new(1)),
            actual: Version::new(2),
        }
    }

    #[test]
    fn store_conflicts_become_retryable() {
        let error: WorkspaceError = conflict().into();
        assert!(error.is_conflict());

        let error: WorkspaceError = DomainError::EventStore(conflict()).into();
        assert!(error.is_conflict());
    }

    #[test]
    fn other_domain_errors_stay_domain_errors() {
        let error: WorkspaceError = DomainError::Workspace(
            domain::WorkspaceLifecycleError::WorkspaceDoesNotExist(WorkspaceName::new("user")),
        )
        .into();
        assert!(matches!(error, WorkspaceError::Domain(_)));
        assert!(!error.is_conflict());
    }
}
