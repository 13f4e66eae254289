//! Workspace coordinator.

use std::future::Future;

use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use domain::{
    CommandHandler, ContentGraph, ContentStreamCommandHandler, EventsToPublish, Workspace,
    WorkspaceStatus, Workspaces, load_content_graph,
};
use event_store::{EventStore, EventStoreError, ExpectedVersion, StreamName, Version};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CommandFailure, Result, WorkspaceError};
use crate::extracted::ExtractedCommands;
use crate::simulator::{CommandSimulator, RebaseErrorHandlingStrategy, SimulatedCommand};

/// Outcome of a workspace operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkspaceChange {
    pub workspace_name: WorkspaceName,
    pub previous_content_stream_id: ContentStreamId,

    /// Equal to `previous_content_stream_id` if nothing had to change.
    pub new_content_stream_id: ContentStreamId,

    /// Commands a forced rebase dropped.
    pub dropped_commands: Vec<CommandFailure>,
}

impl WorkspaceChange {
    fn unchanged(workspace_name: &WorkspaceName, content_stream_id: ContentStreamId) -> Self {
        Self::moved(workspace_name, content_stream_id, content_stream_id)
    }

    fn moved(
        workspace_name: &WorkspaceName,
        previous_content_stream_id: ContentStreamId,
        new_content_stream_id: ContentStreamId,
    ) -> Self {
        Self {
            workspace_name: workspace_name.clone(),
            previous_content_stream_id,
            new_content_stream_id,
            dropped_commands: Vec::new(),
        }
    }

    /// Returns true if the workspace still points at the same content stream.
    pub fn is_unchanged(&self) -> bool {
        self.previous_content_stream_id == self.new_content_stream_id
    }
}

/// The base a workspace operation works against.
struct Base {
    name: WorkspaceName,
    workspace: Workspace,
    content_stream_id: ContentStreamId,
}

/// Drives rebase, publish and discard of workspaces.
///
/// Every operation that rewrites a workspace follows the same steps: read
/// the workspace's commands, close its content stream, replay the commands
/// in memory, commit the resulting events, fork a new content stream, move
/// the workspace onto it and finally remove the old stream. The close only
/// succeeds if nothing was written since the commands were read, so a racing
/// write fails the operation with a conflict instead of getting lost. A
/// failure before the workspace moved reopens the old stream, so the
/// workspace stays usable.
pub struct WorkspaceCoordinator<S: EventStore + Clone> {
    store: S,
    content_streams: ContentStreamCommandHandler<S>,
    workspaces: CommandHandler<S, Workspace>,
    finder: Workspaces<S>,
}

impl<S: EventStore + Clone> WorkspaceCoordinator<S> {
    /// Creates a new coordinator over the given event store.
    pub fn new(store: S) -> Self {
        Self {
            content_streams: ContentStreamCommandHandler::new(store.clone()),
            workspaces: CommandHandler::new(store.clone()),
            finder: Workspaces::new(store.clone()),
            store,
        }
    }

    /// Returns the workspace finder.
    pub fn workspaces(&self) -> &Workspaces<S> {
        &self.finder
    }

    /// Creates a workspace without base on a new, empty content stream.
    #[tracing::instrument(skip(self), fields(workspace = %name))]
    pub async fn create_root_workspace(
        &self,
        name: &WorkspaceName,
        content_stream_id: ContentStreamId,
    ) -> Result<()> {
        observe("create_root", async {
            self.ensure_absent(name).await?;
            self.content_streams
                .create_content_stream(content_stream_id)
                .await?;
            self.workspaces
                .execute(name, |ws| ws.create_root(name, content_stream_id))
                .await?;

            tracing::info!(%content_stream_id, "root workspace created");
            Ok(())
        })
        .await
    }

    /// Creates a workspace forked off the current state of its base.
    #[tracing::instrument(skip(self), fields(workspace = %name, base = %base_workspace_name))]
    pub async fn create_workspace(
        &self,
        name: &WorkspaceName,
        base_workspace_name: &WorkspaceName,
        content_stream_id: ContentStreamId,
    ) -> Result<()> {
        observe("create", async {
            self.ensure_absent(name).await?;
            let (_, base_content_stream_id) = self.load_workspace(base_workspace_name).await?;

            let base_version = self.content_stream_version(base_content_stream_id).await?;
            self.content_streams
                .fork_content_stream(content_stream_id, base_content_stream_id, base_version)
                .await?;
            self.workspaces
                .execute(name, |ws| ws.create(name, base_workspace_name, content_stream_id))
                .await?;

            tracing::info!(%content_stream_id, base_version = %base_version, "workspace created");
            Ok(())
        })
        .await
    }

    /// Replays the workspace's changes on top of the current state of its base.
    ///
    /// An up-to-date workspace is left untouched. Without changes the
    /// workspace is simply forked anew.
    #[tracing::instrument(skip(self), fields(workspace = %name))]
    pub async fn rebase_workspace(
        &self,
        name: &WorkspaceName,
        strategy: RebaseErrorHandlingStrategy,
    ) -> Result<WorkspaceChange> {
        observe("rebase", async {
            let (workspace, content_stream_id) = self.load_workspace(name).await?;
            let base = self.load_base(name, &workspace).await?;

            let status = self
                .finder
                .status(&workspace, Some(&base.workspace))
                .await?;
            if status == WorkspaceStatus::UpToDate {
                tracing::debug!("workspace is up to date");
                return Ok(WorkspaceChange::unchanged(name, content_stream_id));
            }

            let (commands, extracted_at) = self.extract_commands(content_stream_id).await?;
            self.content_streams
                .close_content_stream_at(content_stream_id, extracted_at)
                .await?;
            let new_content_stream_id = ContentStreamId::new();

            if commands.is_empty() {
                let result = self
                    .rebase_unchanged_closed(name, &base, new_content_stream_id)
                    .await;
                self.settle(content_stream_id, new_content_stream_id, result)
                    .await?;

                tracing::info!(%new_content_stream_id, "workspace rebased without changes");
                return Ok(WorkspaceChange::moved(
                    name,
                    content_stream_id,
                    new_content_stream_id,
                ));
            }

            let result = self
                .rebase_closed(name, &base, &commands, new_content_stream_id, strategy)
                .await;
            let dropped_commands = self
                .settle(content_stream_id, new_content_stream_id, result)
                .await?;

            tracing::info!(
                %new_content_stream_id,
                commands = commands.len(),
                dropped = dropped_commands.len(),
                "workspace rebased"
            );
            Ok(WorkspaceChange {
                dropped_commands,
                ..WorkspaceChange::moved(name, content_stream_id, new_content_stream_id)
            })
        })
        .await
    }

    /// Publishes all changes of the workspace to its base.
    ///
    /// A workspace without changes is left untouched.
    #[tracing::instrument(skip(self), fields(workspace = %name))]
    pub async fn publish_workspace(&self, name: &WorkspaceName) -> Result<WorkspaceChange> {
        observe("publish", async {
            let (workspace, content_stream_id) = self.load_workspace(name).await?;
            let base = self.load_base(name, &workspace).await?;

            let (commands, extracted_at) = self.extract_commands(content_stream_id).await?;
            if commands.is_empty() {
                tracing::debug!("nothing to publish");
                return Ok(WorkspaceChange::unchanged(name, content_stream_id));
            }

            self.content_streams
                .close_content_stream_at(content_stream_id, extracted_at)
                .await?;
            let new_content_stream_id = ContentStreamId::new();
            let result = self
                .publish_closed(name, &base, &commands, new_content_stream_id)
                .await;
            self.settle(content_stream_id, new_content_stream_id, result)
                .await?;

            tracing::info!(
                %new_content_stream_id,
                target = %base.name,
                commands = commands.len(),
                "workspace published"
            );
            Ok(WorkspaceChange::moved(
                name,
                content_stream_id,
                new_content_stream_id,
            ))
        })
        .await
    }

    /// Publishes the changes to the given nodes and keeps the rest.
    #[tracing::instrument(skip(self), fields(workspace = %name, nodes = node_ids.len()))]
    pub async fn publish_individual_nodes(
        &self,
        name: &WorkspaceName,
        node_ids: &[NodeAggregateId],
    ) -> Result<WorkspaceChange> {
        observe("publish_individual_nodes", async {
            let (workspace, content_stream_id) = self.load_workspace(name).await?;
            let base = self.load_base(name, &workspace).await?;

            let (commands, extracted_at) = self.extract_commands(content_stream_id).await?;
            let (matching, remaining) = commands.partition_by_nodes(node_ids);
            if matching.is_empty() {
                tracing::debug!("no changes to the given nodes");
                return Ok(WorkspaceChange::unchanged(name, content_stream_id));
            }

            self.content_streams
                .close_content_stream_at(content_stream_id, extracted_at)
                .await?;
            let new_content_stream_id = ContentStreamId::new();
            let result = self
                .publish_partially_closed(
                    name,
                    &base,
                    (&matching, &remaining),
                    node_ids,
                    new_content_stream_id,
                )
                .await;
            self.settle(content_stream_id, new_content_stream_id, result)
                .await?;

            tracing::info!(
                %new_content_stream_id,
                target = %base.name,
                published = matching.len(),
                kept = remaining.len(),
                "nodes published"
            );
            Ok(WorkspaceChange::moved(
                name,
                content_stream_id,
                new_content_stream_id,
            ))
        })
        .await
    }

    /// Drops all changes of the workspace and forks it anew from its base.
    #[tracing::instrument(skip(self), fields(workspace = %name))]
    pub async fn discard_workspace(&self, name: &WorkspaceName) -> Result<WorkspaceChange> {
        observe("discard", async {
            let (workspace, content_stream_id) = self.load_workspace(name).await?;
            let base = self.load_base(name, &workspace).await?;

            self.content_streams
                .close_content_stream(content_stream_id)
                .await?;
            let new_content_stream_id = ContentStreamId::new();
            let result = self.discard_closed(name, &base, new_content_stream_id).await;
            self.settle(content_stream_id, new_content_stream_id, result)
                .await?;

            tracing::info!(%new_content_stream_id, "workspace discarded");
            Ok(WorkspaceChange::moved(
                name,
                content_stream_id,
                new_content_stream_id,
            ))
        })
        .await
    }

    /// Drops the changes to the given nodes and keeps the rest.
    #[tracing::instrument(skip(self), fields(workspace = %name, nodes = node_ids.len()))]
    pub async fn discard_individual_nodes(
        &self,
        name: &WorkspaceName,
        node_ids: &[NodeAggregateId],
    ) -> Result<WorkspaceChange> {
        observe("discard_individual_nodes", async {
            let (workspace, content_stream_id) = self.load_workspace(name).await?;
            let base = self.load_base(name, &workspace).await?;

            let (commands, extracted_at) = self.extract_commands(content_stream_id).await?;
            let (matching, remaining) = commands.partition_by_nodes(node_ids);
            if matching.is_empty() {
                tracing::debug!("no changes to the given nodes");
                return Ok(WorkspaceChange::unchanged(name, content_stream_id));
            }

            self.content_streams
                .close_content_stream_at(content_stream_id, extracted_at)
                .await?;
            let new_content_stream_id = ContentStreamId::new();
            let result = self
                .discard_partially_closed(name, &base, &remaining, node_ids, new_content_stream_id)
                .await;
            self.settle(content_stream_id, new_content_stream_id, result)
                .await?;

            tracing::info!(
                %new_content_stream_id,
                discarded = matching.len(),
                kept = remaining.len(),
                "nodes discarded"
            );
            Ok(WorkspaceChange::moved(
                name,
                content_stream_id,
                new_content_stream_id,
            ))
        })
        .await
    }

    /// Deletes a workspace no other workspace is based on, with its content stream.
    #[tracing::instrument(skip(self), fields(workspace = %name))]
    pub async fn delete_workspace(&self, name: &WorkspaceName) -> Result<()> {
        observe("delete", async {
            let (_, content_stream_id) = self.load_workspace(name).await?;

            let dependents: Vec<WorkspaceName> = self
                .finder
                .find_all()
                .await?
                .into_iter()
                .filter(|description| description.base_workspace_name.as_ref() == Some(name))
                .map(|description| description.workspace_name)
                .collect();
            if !dependents.is_empty() {
                return Err(WorkspaceError::WorkspaceHasDependents {
                    workspace_name: name.clone(),
                    dependents,
                });
            }

            self.workspaces.execute(name, |ws| ws.remove(name)).await?;
            self.remove_previous(content_stream_id).await;

            tracing::info!("workspace deleted");
            Ok(())
        })
        .await
    }

    async fn rebase_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        commands: &ExtractedCommands,
        new_content_stream_id: ContentStreamId,
        strategy: RebaseErrorHandlingStrategy,
    ) -> Result<Vec<CommandFailure>> {
        let (graph, base_version) = self.read_content(base.content_stream_id).await?;

        let mut simulator = CommandSimulator::new(graph);
        let rebased = simulator.run(new_content_stream_id, commands);
        let dropped = simulator.finish(name, strategy)?;

        let forked = self
            .content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.commit_simulated(new_content_stream_id, name, &rebased, forked.new_version)
            .await?;
        self.workspaces
            .execute(name, |ws| ws.rebase(name, new_content_stream_id))
            .await?;
        Ok(dropped)
    }

    async fn rebase_unchanged_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        new_content_stream_id: ContentStreamId,
    ) -> Result<()> {
        let base_version = self.content_stream_version(base.content_stream_id).await?;
        self.content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.workspaces
            .execute(name, |ws| ws.rebase(name, new_content_stream_id))
            .await?;
        Ok(())
    }

    async fn publish_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        commands: &ExtractedCommands,
        new_content_stream_id: ContentStreamId,
    ) -> Result<()> {
        let (graph, base_version) = self.read_content(base.content_stream_id).await?;

        let mut simulator = CommandSimulator::new(graph);
        let published = simulator.run(base.content_stream_id, commands);
        simulator.finish(name, RebaseErrorHandlingStrategy::Fail)?;

        let base_version = self
            .commit_simulated(base.content_stream_id, &base.name, &published, base_version)
            .await?;
        self.content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.workspaces
            .execute(name, |ws| ws.publish(name, new_content_stream_id))
            .await?;
        Ok(())
    }

    async fn publish_partially_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        (matching, remaining): (&ExtractedCommands, &ExtractedCommands),
        node_ids: &[NodeAggregateId],
        new_content_stream_id: ContentStreamId,
    ) -> Result<()> {
        let (graph, base_version) = self.read_content(base.content_stream_id).await?;

        // the remaining commands see the base after the published ones
        let mut simulator = CommandSimulator::new(graph);
        let published = simulator.run(base.content_stream_id, matching);
        let kept = simulator.run(new_content_stream_id, remaining);
        simulator.finish(name, RebaseErrorHandlingStrategy::Fail)?;

        let base_version = self
            .commit_simulated(base.content_stream_id, &base.name, &published, base_version)
            .await?;
        let forked = self
            .content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.commit_simulated(new_content_stream_id, name, &kept, forked.new_version)
            .await?;
        self.workspaces
            .execute(name, |ws| {
                ws.publish_partially(name, new_content_stream_id, node_ids.to_vec())
            })
            .await?;
        Ok(())
    }

    async fn discard_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        new_content_stream_id: ContentStreamId,
    ) -> Result<()> {
        let base_version = self.content_stream_version(base.content_stream_id).await?;
        self.content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.workspaces
            .execute(name, |ws| ws.discard(name, new_content_stream_id))
            .await?;
        Ok(())
    }

    async fn discard_partially_closed(
        &self,
        name: &WorkspaceName,
        base: &Base,
        remaining: &ExtractedCommands,
        node_ids: &[NodeAggregateId],
        new_content_stream_id: ContentStreamId,
    ) -> Result<()> {
        let (graph, base_version) = self.read_content(base.content_stream_id).await?;

        let mut simulator = CommandSimulator::new(graph);
        let kept = simulator.run(new_content_stream_id, remaining);
        simulator.finish(name, RebaseErrorHandlingStrategy::Fail)?;

        let forked = self
            .content_streams
            .fork_content_stream(new_content_stream_id, base.content_stream_id, base_version)
            .await?;
        self.commit_simulated(new_content_stream_id, name, &kept, forked.new_version)
            .await?;
        self.workspaces
            .execute(name, |ws| {
                ws.discard_partially(name, new_content_stream_id, node_ids.to_vec())
            })
            .await?;
        Ok(())
    }

    /// Commits the events of replayed commands to `target`, which must be at `version`.
    ///
    /// The events record the command, addressed to `workspace_name`, with its
    /// original causation id and initiating timestamp. Returns the version of
    /// `target` afterwards.
    async fn commit_simulated(
        &self,
        target: ContentStreamId,
        workspace_name: &WorkspaceName,
        simulated: &[SimulatedCommand],
        version: Version,
    ) -> Result<Version> {
        let mut events = Vec::new();
        for replayed in simulated {
            let command = replayed
                .extracted
                .command
                .for_workspace(workspace_name.clone());
            let metadata = command.to_metadata(replayed.extracted.initiating_timestamp)?;
            let causation_id = replayed
                .extracted
                .causation_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            let pending = EventsToPublish::for_command(
                target,
                &replayed.events,
                &metadata,
                &causation_id,
                ExpectedVersion::Any,
            )?;
            events.extend(pending.events);
        }
        if events.is_empty() {
            return Ok(version);
        }

        let commit = EventsToPublish::new(
            StreamName::for_content_stream(target),
            events,
            ExpectedVersion::from_version(version),
        )
        .publish(&self.store)
        .await?;
        Ok(commit.highest_version)
    }

    /// Finishes an operation on a closed content stream.
    ///
    /// On success the old stream is removed. On failure it is reopened and the
    /// half-built new stream, if any, is removed.
    async fn settle<T>(
        &self,
        previous_content_stream_id: ContentStreamId,
        new_content_stream_id: ContentStreamId,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.remove_previous(previous_content_stream_id).await;
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(%error, "workspace operation failed, reopening content stream");
                if let Err(e) = self
                    .content_streams
                    .reopen_content_stream(previous_content_stream_id)
                    .await
                {
                    tracing::error!(
                        error = %e,
                        content_stream_id = %previous_content_stream_id,
                        "failed to reopen content stream"
                    );
                }
                if let Ok(orphan) = self.content_streams.load(new_content_stream_id).await
                    && orphan.exists()
                {
                    self.remove_previous(new_content_stream_id).await;
                }
                Err(error)
            }
        }
    }

    async fn remove_previous(&self, content_stream_id: ContentStreamId) {
        if let Err(e) = self
            .content_streams
            .remove_content_stream(content_stream_id)
            .await
        {
            tracing::warn!(error = %e, %content_stream_id, "failed to remove content stream");
        }
    }

    async fn ensure_absent(&self, name: &WorkspaceName) -> Result<()> {
        if self.finder.load(name).await?.exists() {
            return Err(WorkspaceError::WorkspaceAlreadyExists(name.clone()));
        }
        Ok(())
    }

    async fn load_workspace(&self, name: &WorkspaceName) -> Result<(Workspace, ContentStreamId)> {
        let workspace = self.finder.load(name).await?;
        let content_stream_id = workspace
            .ensure_exists(name)
            .map_err(|_| WorkspaceError::WorkspaceNotFound(name.clone()))?;
        Ok((workspace, content_stream_id))
    }

    async fn load_base(&self, name: &WorkspaceName, workspace: &Workspace) -> Result<Base> {
        let base_name = workspace
            .base_workspace_name()
            .ok_or_else(|| WorkspaceError::WorkspaceHasNoBase(name.clone()))?;
        let (base_workspace, content_stream_id) = self.load_workspace(base_name).await?;
        Ok(Base {
            name: base_name.clone(),
            workspace: base_workspace,
            content_stream_id,
        })
    }

    /// Reads the commands recorded on a content stream and the version they
    /// were read at.
    async fn extract_commands(
        &self,
        content_stream_id: ContentStreamId,
    ) -> Result<(ExtractedCommands, Version)> {
        let events = self
            .store
            .load(&StreamName::for_content_stream(content_stream_id))
            .await?;
        let version = events
            .last()
            .map(|envelope| envelope.version)
            .unwrap_or_else(Version::initial);
        Ok((ExtractedCommands::from_events(&events)?, version))
    }

    async fn content_stream_version(&self, content_stream_id: ContentStreamId) -> Result<Version> {
        Ok(self
            .store
            .stream_version(&StreamName::for_content_stream(content_stream_id))
            .await?
            .unwrap_or_else(Version::initial))
    }

    /// Loads the graph of a content stream together with the version it reflects.
    ///
    /// A write racing the load is reported as a concurrency conflict.
    async fn read_content(
        &self,
        content_stream_id: ContentStreamId,
    ) -> Result<(ContentGraph, Version)> {
        let version = self.content_stream_version(content_stream_id).await?;
        let graph = load_content_graph(&self.store, content_stream_id).await?;

        let actual = self.content_stream_version(content_stream_id).await?;
        if actual != version {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: StreamName::for_content_stream(content_stream_id),
                expected: ExpectedVersion::Exact(version),
                actual,
            }
            .into());
        }
        Ok((graph, version))
    }
}

async fn observe<T>(operation: &'static str, future: impl Future<Output = Result<T>>) -> Result<T> {
    let started = std::time::Instant::now();
    let result = future.await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if e.is_conflict() => "conflict",
        Err(_) => "failure",
    };
    metrics::counter!(
        "workspace_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!("workspace_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());

    result
}
