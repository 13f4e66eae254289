//! Commands recorded in a content stream.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::NodeAggregateId;
use domain::{ContentRepositoryEvent, RebasableCommand};
use domain::node::INITIATING_TIMESTAMP_KEY;
use event_store::{EventEnvelope, SequenceNumber};

use crate::error::{Result, WorkspaceError};

/// A command read back from the events it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCommand {
    pub command: RebasableCommand,

    /// Causation id shared by all events of the original command.
    pub causation_id: Option<String>,

    /// Position of the first event the command produced.
    pub sequence_number: SequenceNumber,

    /// When the command was first issued. Kept across replays.
    pub initiating_timestamp: DateTime<Utc>,
}

impl ExtractedCommand {
    /// Returns true if the command changes one of the given nodes.
    pub fn matches_any(&self, node_ids: &[NodeAggregateId]) -> bool {
        node_ids
            .iter()
            .any(|node_id| self.command.matches_node_id(node_id))
    }
}

/// The commands of a content stream, in the order they were committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedCommands(Vec<ExtractedCommand>);

impl ExtractedCommands {
    /// Reconstructs the commands behind the given events.
    ///
    /// Lifecycle events of the stream itself are skipped. Events sharing a
    /// causation id yield their command once. A changing event without a
    /// recorded command fails the extraction.
    pub fn from_events(events: &[EventEnvelope]) -> Result<Self> {
        let mut ordered: Vec<&EventEnvelope> = events.iter().collect();
        ordered.sort_by_key(|envelope| envelope.sequence_number);

        let mut seen = HashSet::new();
        let mut commands = Vec::new();
        for envelope in ordered {
            let event = ContentRepositoryEvent::from_envelope(envelope)?;
            if !event.is_publishable() {
                continue;
            }
            if let Some(causation_id) = &envelope.causation_id
                && !seen.insert(causation_id.clone())
            {
                continue;
            }

            let command = RebasableCommand::from_metadata(&envelope.metadata).ok_or_else(|| {
                WorkspaceError::MissingRebasableCommand {
                    event_type: envelope.event_type.clone(),
                    sequence_number: envelope.sequence_number,
                }
            })??;
            let initiating_timestamp = envelope
                .metadata
                .get(INITIATING_TIMESTAMP_KEY)
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or(envelope.recorded_at);

            commands.push(ExtractedCommand {
                command,
                causation_id: envelope.causation_id.clone(),
                sequence_number: envelope.sequence_number,
                initiating_timestamp,
            });
        }

        Ok(Self(commands))
    }

    /// Splits the commands into those changing one of `node_ids` and the rest.
    ///
    /// Both halves keep the original order.
    pub fn partition_by_nodes(self, node_ids: &[NodeAggregateId]) -> (Self, Self) {
        let (matching, remaining) = self
            .0
            .into_iter()
            .partition(|command| command.matches_any(node_ids));
        (Self(matching), Self(remaining))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedCommand> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a ExtractedCommands {
    type Item = &'a ExtractedCommand;
    type IntoIter = std::slice::Iter<'a, ExtractedCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
