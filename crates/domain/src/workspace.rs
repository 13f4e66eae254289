//! Workspace aggregate and finder.
//!
//! A workspace is a named pointer to its current content stream, optionally
//! based on another workspace. The pointer only moves through workspace
//! events, emitted once the new content stream is ready.

use std::collections::BTreeMap;

use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use event_store::{EventEnvelope, EventStore, StreamName, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, load_aggregate};
use crate::content_stream::ContentStream;
use crate::error::{DomainError, WorkspaceLifecycleError};
use crate::event::{
    ContentRepositoryEvent, RootWorkspaceWasCreatedData, WorkspaceWasCreatedData,
    WorkspaceWasDiscardedData, WorkspaceWasPartiallyDiscardedData,
    WorkspaceWasPartiallyPublishedData, WorkspaceWasPublishedData, WorkspaceWasRebasedData,
    WorkspaceWasRemovedData,
};

/// Whether a workspace has seen the latest state of its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    /// The content stream is forked off the base's current content stream head.
    UpToDate,
    /// The base has moved on since the fork.
    Outdated,
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkspaceStatus::UpToDate => write!(f, "UP_TO_DATE"),
            WorkspaceStatus::Outdated => write!(f, "OUTDATED"),
        }
    }
}

/// Workspace aggregate root.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    name: Option<WorkspaceName>,
    base_workspace_name: Option<WorkspaceName>,
    current_content_stream_id: Option<ContentStreamId>,
    removed: bool,
    version: Version,
}

impl Aggregate for Workspace {
    type Id = WorkspaceName;
    type Error = WorkspaceLifecycleError;

    fn aggregate_type() -> &'static str {
        "Workspace"
    }

    fn stream_name(id: &WorkspaceName) -> StreamName {
        StreamName::for_workspace(id)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: &ContentRepositoryEvent) {
        match event {
            ContentRepositoryEvent::RootWorkspaceWasCreated(data) => {
                self.name = Some(data.workspace_name.clone());
                self.base_workspace_name = None;
                self.current_content_stream_id = Some(data.new_content_stream_id);
                self.removed = false;
            }
            ContentRepositoryEvent::WorkspaceWasCreated(data) => {
                self.name = Some(data.workspace_name.clone());
                self.base_workspace_name = Some(data.base_workspace_name.clone());
                self.current_content_stream_id = Some(data.new_content_stream_id);
                self.removed = false;
            }
            ContentRepositoryEvent::WorkspaceWasRebased(data) => {
                self.current_content_stream_id = Some(data.new_content_stream_id);
            }
            ContentRepositoryEvent::WorkspaceWasPublished(data) => {
                self.current_content_stream_id = Some(data.new_source_content_stream_id);
            }
            ContentRepositoryEvent::WorkspaceWasPartiallyPublished(data) => {
                self.current_content_stream_id = Some(data.new_source_content_stream_id);
            }
            ContentRepositoryEvent::WorkspaceWasDiscarded(data) => {
                self.current_content_stream_id = Some(data.new_content_stream_id);
            }
            ContentRepositoryEvent::WorkspaceWasPartiallyDiscarded(data) => {
                self.current_content_stream_id = Some(data.new_content_stream_id);
            }
            ContentRepositoryEvent::WorkspaceWasRemoved(_) => {
                self.removed = true;
            }
            _ => {}
        }
    }
}

// Query methods
impl Workspace {
    /// Returns the workspace name; `None` if the workspace was never created.
    pub fn name(&self) -> Option<&WorkspaceName> {
        self.name.as_ref()
    }

    /// Returns the base workspace name; `None` for root workspaces.
    pub fn base_workspace_name(&self) -> Option<&WorkspaceName> {
        self.base_workspace_name.as_ref()
    }

    /// Returns the content stream the workspace currently points at.
    pub fn current_content_stream_id(&self) -> Option<ContentStreamId> {
        self.current_content_stream_id
    }

    /// Returns true if the workspace exists and was not removed.
    pub fn exists(&self) -> bool {
        self.name.is_some() && !self.removed
    }

    /// Returns true for a workspace without base.
    pub fn is_root(&self) -> bool {
        self.base_workspace_name.is_none()
    }

    /// Returns the current content stream, failing if the workspace does not exist.
    pub fn ensure_exists(
        &self,
        name: &WorkspaceName,
    ) -> Result<ContentStreamId, WorkspaceLifecycleError> {
        match self.current_content_stream_id {
            Some(id) if self.exists() => Ok(id),
            _ => Err(WorkspaceLifecycleError::WorkspaceDoesNotExist(name.clone())),
        }
    }
}

// Command methods (return events)
impl Workspace {
    /// Creates a workspace without base.
    pub fn create_root(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        if self.exists() {
            return Err(WorkspaceLifecycleError::WorkspaceAlreadyExists(name.clone()));
        }

        Ok(vec![ContentRepositoryEvent::RootWorkspaceWasCreated(
            RootWorkspaceWasCreatedData {
                workspace_name: name.clone(),
                new_content_stream_id,
            },
        )])
    }

    /// Creates a workspace based on `base_workspace_name`.
    pub fn create(
        &self,
        name: &WorkspaceName,
        base_workspace_name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        if self.exists() {
            return Err(WorkspaceLifecycleError::WorkspaceAlreadyExists(name.clone()));
        }

        Ok(vec![ContentRepositoryEvent::WorkspaceWasCreated(
            WorkspaceWasCreatedData {
                workspace_name: name.clone(),
                base_workspace_name: base_workspace_name.clone(),
                new_content_stream_id,
            },
        )])
    }

    /// Moves the workspace onto a rebased content stream.
    pub fn rebase(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        let previous_content_stream_id = self.ensure_exists(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasRebased(
            WorkspaceWasRebasedData {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id,
            },
        )])
    }

    /// Records that all changes were published to the base workspace.
    pub fn publish(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        let previous_source_content_stream_id = self.ensure_exists(name)?;
        let target_workspace_name = self.base(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasPublished(
            WorkspaceWasPublishedData {
                source_workspace_name: name.clone(),
                target_workspace_name,
                new_source_content_stream_id: new_content_stream_id,
                previous_source_content_stream_id,
            },
        )])
    }

    /// Records that the changes to `published_nodes` were published.
    pub fn publish_partially(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
        published_nodes: Vec<NodeAggregateId>,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        let previous_source_content_stream_id = self.ensure_exists(name)?;
        let target_workspace_name = self.base(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasPartiallyPublished(
            WorkspaceWasPartiallyPublishedData {
                source_workspace_name: name.clone(),
                target_workspace_name,
                new_source_content_stream_id: new_content_stream_id,
                previous_source_content_stream_id,
                published_nodes,
            },
        )])
    }

    /// Records that all changes were discarded.
    pub fn discard(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        let previous_content_stream_id = self.ensure_exists(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasDiscarded(
            WorkspaceWasDiscardedData {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id,
            },
        )])
    }

    /// Records that the changes to `discarded_nodes` were discarded.
    pub fn discard_partially(
        &self,
        name: &WorkspaceName,
        new_content_stream_id: ContentStreamId,
        discarded_nodes: Vec<NodeAggregateId>,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        let previous_content_stream_id = self.ensure_exists(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasPartiallyDiscarded(
            WorkspaceWasPartiallyDiscardedData {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id,
                discarded_nodes,
            },
        )])
    }

    /// Deletes the workspace.
    pub fn remove(
        &self,
        name: &WorkspaceName,
    ) -> Result<Vec<ContentRepositoryEvent>, WorkspaceLifecycleError> {
        self.ensure_exists(name)?;

        Ok(vec![ContentRepositoryEvent::WorkspaceWasRemoved(
            WorkspaceWasRemovedData {
                workspace_name: name.clone(),
            },
        )])
    }

    fn base(&self, name: &WorkspaceName) -> Result<WorkspaceName, WorkspaceLifecycleError> {
        self.base_workspace_name
            .clone()
            .ok_or_else(|| WorkspaceLifecycleError::BaseWorkspaceDoesNotExist(name.clone()))
    }
}

/// Read view of a workspace, including its derived status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceDescription {
    pub workspace_name: WorkspaceName,
    pub base_workspace_name: Option<WorkspaceName>,
    pub current_content_stream_id: ContentStreamId,
    pub status: WorkspaceStatus,
}

/// Finds workspaces and derives their status.
#[derive(Clone)]
pub struct Workspaces<S: EventStore> {
    store: S,
}

impl<S: EventStore> Workspaces<S> {
    /// Creates a new finder over the given event store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads the workspace aggregate, which may not exist.
    pub async fn load(&self, name: &WorkspaceName) -> Result<Workspace, DomainError> {
        load_aggregate(&self.store, name).await
    }

    /// Finds a workspace by name.
    pub async fn find(
        &self,
        name: &WorkspaceName,
    ) -> Result<Option<WorkspaceDescription>, DomainError> {
        let workspace = self.load(name).await?;
        if !workspace.exists() {
            return Ok(None);
        }

        let base = match workspace.base_workspace_name() {
            Some(base_name) => Some(self.load(base_name).await?),
            None => None,
        };
        self.describe(&workspace, base.as_ref()).await
    }

    /// Finds all existing workspaces, ordered by name.
    pub async fn find_all(&self) -> Result<Vec<WorkspaceDescription>, DomainError> {
        let workspaces = self.load_all().await?;

        let mut descriptions = Vec::with_capacity(workspaces.len());
        for workspace in workspaces.values() {
            let base = workspace
                .base_workspace_name()
                .and_then(|base_name| workspaces.get(base_name));
            if let Some(description) = self.describe(workspace, base).await? {
                descriptions.push(description);
            }
        }
        Ok(descriptions)
    }

    /// Finds the workspace currently pointing at a content stream.
    pub async fn find_by_content_stream_id(
        &self,
        content_stream_id: ContentStreamId,
    ) -> Result<Option<Workspace>, DomainError> {
        Ok(self
            .load_all()
            .await?
            .into_values()
            .find(|workspace| workspace.current_content_stream_id() == Some(content_stream_id)))
    }

    /// Derives the status of a workspace from its fork point and its base.
    ///
    /// A workspace is outdated once content was written to the base after
    /// the fork.
    pub async fn status(
        &self,
        workspace: &Workspace,
        base: Option<&Workspace>,
    ) -> Result<WorkspaceStatus, DomainError> {
        if workspace.is_root() {
            return Ok(WorkspaceStatus::UpToDate);
        }
        let (Some(content_stream_id), Some(base_content_stream_id)) = (
            workspace.current_content_stream_id(),
            base.and_then(Workspace::current_content_stream_id),
        ) else {
            return Ok(WorkspaceStatus::Outdated);
        };

        let content_stream: ContentStream = load_aggregate(&self.store, &content_stream_id).await?;
        let Some(fork_point) = content_stream.fork_point() else {
            return Ok(WorkspaceStatus::Outdated);
        };
        if fork_point.source_content_stream_id != base_content_stream_id {
            return Ok(WorkspaceStatus::Outdated);
        }

        // closing and reopening the base does not change its content
        let base_events = self
            .store
            .load(&StreamName::for_content_stream(base_content_stream_id))
            .await?;
        for envelope in base_events
            .iter()
            .filter(|e| e.version > fork_point.version_of_source_content_stream)
        {
            if ContentRepositoryEvent::from_envelope(envelope)?.is_publishable() {
                return Ok(WorkspaceStatus::Outdated);
            }
        }
        Ok(WorkspaceStatus::UpToDate)
    }

    async fn describe(
        &self,
        workspace: &Workspace,
        base: Option<&Workspace>,
    ) -> Result<Option<WorkspaceDescription>, DomainError> {
        let (Some(name), Some(current_content_stream_id)) =
            (workspace.name(), workspace.current_content_stream_id())
        else {
            return Ok(None);
        };
        if !workspace.exists() {
            return Ok(None);
        }

        Ok(Some(WorkspaceDescription {
            workspace_name: name.clone(),
            base_workspace_name: workspace.base_workspace_name().cloned(),
            current_content_stream_id,
            status: self.status(workspace, base).await?,
        }))
    }

    async fn load_all(&self) -> Result<BTreeMap<WorkspaceName, Workspace>, DomainError> {
        let events = self
            .store
            .load_category(StreamName::WORKSPACE_CATEGORY)
            .await?;

        let mut by_stream: BTreeMap<StreamName, Vec<EventEnvelope>> = BTreeMap::new();
        for envelope in events {
            by_stream
                .entry(envelope.stream_name.clone())
                .or_default()
                .push(envelope);
        }

        let mut workspaces = BTreeMap::new();
        for envelopes in by_stream.values() {
            let workspace = Workspace::from_envelopes(envelopes)?;
            if workspace.exists()
                && let Some(name) = workspace.name().cloned()
            {
                workspaces.insert(name, workspace);
            }
        }
        Ok(workspaces)
    }
}
