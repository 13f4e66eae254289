//! In-memory replay of extracted commands.

use common::{ContentStreamId, WorkspaceName};
use domain::{ContentGraph, ContentRepositoryEvent};
use serde::{Deserialize, Serialize};

use crate::error::{CommandFailure, WorkspaceError};
use crate::extracted::{ExtractedCommand, ExtractedCommands};

/// What to do with commands that no longer apply to the new base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebaseErrorHandlingStrategy {
    /// Abort the operation and leave the workspace untouched.
    #[default]
    Fail,
    /// Drop the failing commands and keep the rest.
    Force,
}

/// A replayed command with the events it produced.
#[derive(Debug, Clone)]
pub struct SimulatedCommand {
    pub extracted: ExtractedCommand,
    pub events: Vec<ContentRepositoryEvent>,
}

/// Replays commands against a private copy of a content graph.
///
/// Nothing is written: every command is decided against the graph produced
/// by the commands before it, and the resulting events are collected for
/// the caller to commit.
#[derive(Debug)]
pub struct CommandSimulator {
    graph: ContentGraph,
    failures: Vec<CommandFailure>,
}

impl CommandSimulator {
    /// Starts a simulation on top of `base`.
    pub fn new(base: ContentGraph) -> Self {
        Self {
            graph: base,
            failures: Vec::new(),
        }
    }

    /// Replays the commands in order, addressing their events to `content_stream_id`.
    ///
    /// Failing commands are recorded and skipped; the rest keep going so all
    /// failures are reported at once.
    pub fn run(
        &mut self,
        content_stream_id: ContentStreamId,
        commands: &ExtractedCommands,
    ) -> Vec<SimulatedCommand> {
        let mut simulated = Vec::with_capacity(commands.len());
        for extracted in commands {
            match extracted.command.handle(&self.graph, content_stream_id) {
                Ok(events) => {
                    for event in &events {
                        self.graph.apply(event);
                    }
                    simulated.push(SimulatedCommand {
                        extracted: extracted.clone(),
                        events,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        command = extracted.command.command_class(),
                        sequence_number = %extracted.sequence_number,
                        error = %e,
                        "command failed during simulation"
                    );
                    self.failures.push(CommandFailure {
                        command: extracted.command.clone(),
                        sequence_number: extracted.sequence_number,
                        message: e.to_string(),
                    });
                }
            }
        }
        simulated
    }

    /// Returns the graph after all successful commands.
    pub fn graph(&self) -> &ContentGraph {
        &self.graph
    }

    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Finishes the simulation under the given strategy.
    ///
    /// Returns the dropped commands, which is always empty for `Fail`.
    pub fn finish(
        self,
        workspace_name: &WorkspaceName,
        strategy: RebaseErrorHandlingStrategy,
    ) -> Result<Vec<CommandFailure>, WorkspaceError> {
        match strategy {
            RebaseErrorHandlingStrategy::Fail if self.has_failures() => {
                Err(WorkspaceError::WorkspaceRebaseFailed {
                    workspace_name: workspace_name.clone(),
                    errors: self.failures,
                })
            }
            _ => Ok(self.failures),
        }
    }
}
