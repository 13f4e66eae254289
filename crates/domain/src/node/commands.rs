//! Rebaseable node commands.
//!
//! Every command that changes content in a workspace is recorded in the
//! metadata of the events it produced, so that rebase and publish can replay
//! it against another base.

use chrono::{DateTime, Utc};
use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use event_store::EventMetadata;
use serde::{Deserialize, Serialize};

use crate::error::NodeCommandError;
use crate::event::{
    ContentRepositoryEvent, NodeAggregateWasMovedData, NodeAggregateWasRemovedData,
    NodeAggregateWithNodeWasCreatedData, NodePropertiesWereSetData, PropertyValues,
};

use super::ContentGraph;

/// Metadata key of the command class.
pub const COMMAND_CLASS_KEY: &str = "commandClass";

/// Metadata key of the serialized command.
pub const COMMAND_PAYLOAD_KEY: &str = "commandPayload";

/// Metadata key of the time the command was first issued.
pub const INITIATING_TIMESTAMP_KEY: &str = "initiatingTimestamp";

/// Command to create a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateNodeAggregateWithNode {
    pub workspace_name: WorkspaceName,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: String,

    /// `None` creates a root node.
    #[serde(default)]
    pub parent_node_aggregate_id: Option<NodeAggregateId>,

    #[serde(default)]
    pub initial_properties: PropertyValues,
}

/// Command to set properties of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetNodeProperties {
    pub workspace_name: WorkspaceName,
    pub node_aggregate_id: NodeAggregateId,
    pub properties: PropertyValues,
}

/// Command to move a node below another parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveNodeAggregate {
    pub workspace_name: WorkspaceName,
    pub node_aggregate_id: NodeAggregateId,
    pub new_parent_node_aggregate_id: NodeAggregateId,
}

/// Command to remove a node and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveNodeAggregate {
    pub workspace_name: WorkspaceName,
    pub node_aggregate_id: NodeAggregateId,
}

/// Commands that can be replayed against another content stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "commandClass", content = "commandPayload")]
pub enum RebasableCommand {
    CreateNodeAggregateWithNode(CreateNodeAggregateWithNode),
    SetNodeProperties(SetNodeProperties),
    MoveNodeAggregate(MoveNodeAggregate),
    RemoveNodeAggregate(RemoveNodeAggregate),
}

impl RebasableCommand {
    /// Returns the command class name.
    pub fn command_class(&self) -> &'static str {
        match self {
            RebasableCommand::CreateNodeAggregateWithNode(_) => "CreateNodeAggregateWithNode",
            RebasableCommand::SetNodeProperties(_) => "SetNodeProperties",
            RebasableCommand::MoveNodeAggregate(_) => "MoveNodeAggregate",
            RebasableCommand::RemoveNodeAggregate(_) => "RemoveNodeAggregate",
        }
    }

    /// Returns the workspace the command targets.
    pub fn workspace_name(&self) -> &WorkspaceName {
        match self {
            RebasableCommand::CreateNodeAggregateWithNode(c) => &c.workspace_name,
            RebasableCommand::SetNodeProperties(c) => &c.workspace_name,
            RebasableCommand::MoveNodeAggregate(c) => &c.workspace_name,
            RebasableCommand::RemoveNodeAggregate(c) => &c.workspace_name,
        }
    }

    /// Returns the node the command changes.
    pub fn node_aggregate_id(&self) -> &NodeAggregateId {
        match self {
            RebasableCommand::CreateNodeAggregateWithNode(c) => &c.node_aggregate_id,
            RebasableCommand::SetNodeProperties(c) => &c.node_aggregate_id,
            RebasableCommand::MoveNodeAggregate(c) => &c.node_aggregate_id,
            RebasableCommand::RemoveNodeAggregate(c) => &c.node_aggregate_id,
        }
    }

    /// Returns true if the command changes the given node.
    pub fn matches_node_id(&self, node_aggregate_id: &NodeAggregateId) -> bool {
        self.node_aggregate_id() == node_aggregate_id
    }

    /// Returns the same command addressed to another workspace.
    pub fn for_workspace(&self, workspace_name: WorkspaceName) -> Self {
        let mut command = self.clone();
        match &mut command {
            RebasableCommand::CreateNodeAggregateWithNode(c) => c.workspace_name = workspace_name,
            RebasableCommand::SetNodeProperties(c) => c.workspace_name = workspace_name,
            RebasableCommand::MoveNodeAggregate(c) => c.workspace_name = workspace_name,
            RebasableCommand::RemoveNodeAggregate(c) => c.workspace_name = workspace_name,
        }
        command
    }

    /// Decides on the events of the command against the given content.
    ///
    /// Pure: the graph is not changed and nothing is written.
    pub fn handle(
        &self,
        graph: &ContentGraph,
        content_stream_id: ContentStreamId,
    ) -> Result<Vec<ContentRepositoryEvent>, NodeCommandError> {
        match self {
            RebasableCommand::CreateNodeAggregateWithNode(c) => {
                if graph.contains(&c.node_aggregate_id) {
                    return Err(NodeCommandError::NodeAggregateAlreadyExists(
                        c.node_aggregate_id.clone(),
                    ));
                }
                if let Some(parent) = &c.parent_node_aggregate_id
                    && !graph.contains(parent)
                {
                    return Err(NodeCommandError::ParentNodeAggregateDoesNotExist(
                        parent.clone(),
                    ));
                }

                Ok(vec![ContentRepositoryEvent::NodeAggregateWithNodeWasCreated(
                    NodeAggregateWithNodeWasCreatedData {
                        content_stream_id,
                        node_aggregate_id: c.node_aggregate_id.clone(),
                        node_type_name: c.node_type_name.clone(),
                        parent_node_aggregate_id: c.parent_node_aggregate_id.clone(),
                        initial_properties: c.initial_properties.clone(),
                    },
                )])
            }
            RebasableCommand::SetNodeProperties(c) => {
                require_node(graph, &c.node_aggregate_id)?;

                Ok(vec![ContentRepositoryEvent::NodePropertiesWereSet(
                    NodePropertiesWereSetData {
                        content_stream_id,
                        node_aggregate_id: c.node_aggregate_id.clone(),
                        properties: c.properties.clone(),
                    },
                )])
            }
            RebasableCommand::MoveNodeAggregate(c) => {
                require_node(graph, &c.node_aggregate_id)?;
                if !graph.contains(&c.new_parent_node_aggregate_id) {
                    return Err(NodeCommandError::ParentNodeAggregateDoesNotExist(
                        c.new_parent_node_aggregate_id.clone(),
                    ));
                }
                if graph.is_descendant_or_self(&c.new_parent_node_aggregate_id, &c.node_aggregate_id)
                {
                    return Err(NodeCommandError::CannotMoveIntoDescendant {
                        node_aggregate_id: c.node_aggregate_id.clone(),
                        new_parent_node_aggregate_id: c.new_parent_node_aggregate_id.clone(),
                    });
                }

                Ok(vec![ContentRepositoryEvent::NodeAggregateWasMoved(
                    NodeAggregateWasMovedData {
                        content_stream_id,
                        node_aggregate_id: c.node_aggregate_id.clone(),
                        new_parent_node_aggregate_id: c.new_parent_node_aggregate_id.clone(),
                    },
                )])
            }
            RebasableCommand::RemoveNodeAggregate(c) => {
                require_node(graph, &c.node_aggregate_id)?;

                Ok(vec![ContentRepositoryEvent::NodeAggregateWasRemoved(
                    NodeAggregateWasRemovedData {
                        content_stream_id,
                        node_aggregate_id: c.node_aggregate_id.clone(),
                    },
                )])
            }
        }
    }

    /// Builds the event metadata that records this command.
    pub fn to_metadata(
        &self,
        initiating_timestamp: DateTime<Utc>,
    ) -> Result<EventMetadata, serde_json::Error> {
        let mut metadata = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map.into_iter().collect::<EventMetadata>(),
            _ => EventMetadata::new(),
        };
        metadata.insert(
            INITIATING_TIMESTAMP_KEY.to_string(),
            serde_json::to_value(initiating_timestamp)?,
        );
        Ok(metadata)
    }

    /// Reads the command recorded in event metadata.
    ///
    /// Returns `None` if the metadata records no command.
    pub fn from_metadata(metadata: &EventMetadata) -> Option<Result<Self, serde_json::Error>> {
        let class = metadata.get(COMMAND_CLASS_KEY)?;
        let payload = metadata.get(COMMAND_PAYLOAD_KEY)?;
        let mut recorded = serde_json::Map::new();
        recorded.insert(COMMAND_CLASS_KEY.to_string(), class.clone());
        recorded.insert(COMMAND_PAYLOAD_KEY.to_string(), payload.clone());
        Some(serde_json::from_value(serde_json::Value::Object(recorded)))
    }
}

fn require_node(graph: &ContentGraph, id: &NodeAggregateId) -> Result<(), NodeCommandError> {
    if graph.contains(id) {
        Ok(())
    } else {
        Err(NodeCommandError::NodeAggregateDoesNotExist(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> WorkspaceName {
        WorkspaceName::new("user")
    }

    fn create(id: &str, parent: Option<&str>) -> RebasableCommand {
        RebasableCommand::CreateNodeAggregateWithNode(CreateNodeAggregateWithNode {
            workspace_name: workspace(),
            node_aggregate_id: NodeAggregateId::new(id),
            node_type_name: "Document".to_string(),
            parent_node_aggregate_id: parent.map(NodeAggregateId::new),
            initial_properties: PropertyValues::new(),
        })
    }

    fn graph_after(commands: &[RebasableCommand]) -> ContentGraph {
        let content_stream_id = ContentStreamId::new();
        let mut graph = ContentGraph::new();
        for command in commands {
            for event in command.handle(&graph, content_stream_id).unwrap() {
                graph.apply(&event);
            }
        }
        graph
    }

    #[test]
    fn command_is_tagged_by_class() {
        let json = serde_json::to_value(create("a", None)).unwrap();
        assert_eq!(json["commandClass"], "CreateNodeAggregateWithNode");
        assert_eq!(json["commandPayload"]["node_aggregate_id"], "a");
    }

    #[test]
    fn metadata_records_the_command() {
        let command = create("a", Some("root"));
        let metadata = command.to_metadata(Utc::now()).unwrap();

        assert_eq!(
            metadata.get(COMMAND_CLASS_KEY),
            Some(&serde_json::json!("CreateNodeAggregateWithNode"))
        );
        assert!(metadata.contains_key(INITIATING_TIMESTAMP_KEY));
        assert_eq!(
            RebasableCommand::from_metadata(&metadata).unwrap().unwrap(),
            command
        );
    }

    #[test]
    fn metadata_without_command_yields_none() {
        assert!(RebasableCommand::from_metadata(&EventMetadata::new()).is_none());
    }

    #[test]
    fn create_requires_existing_parent() {
        let result = create("a", Some("missing")).handle(&ContentGraph::new(), ContentStreamId::new());
        assert_eq!(
            result,
            Err(NodeCommandError::ParentNodeAggregateDoesNotExist(
                NodeAggregateId::new("missing")
            ))
        );
    }

    #[test]
    fn create_rejects_duplicates() {
        let graph = graph_after(&[create("a", None)]);
        let result = create("a", None).handle(&graph, ContentStreamId::new());
        assert_eq!(
            result,
            Err(NodeCommandError::NodeAggregateAlreadyExists(
                NodeAggregateId::new("a")
            ))
        );
    }

    #[test]
    fn set_properties_requires_node() {
        let command = RebasableCommand::SetNodeProperties(SetNodeProperties {
            workspace_name: workspace(),
            node_aggregate_id: NodeAggregateId::new("a"),
            properties: PropertyValues::new(),
        });

        assert!(matches!(
            command.handle(&ContentGraph::new(), ContentStreamId::new()),
            Err(NodeCommandError::NodeAggregateDoesNotExist(_))
        ));
    }

    #[test]
    fn move_into_own_descendant_is_rejected() {
        let graph = graph_after(&[create("a", None), create("b", Some("a"))]);
        let command = RebasableCommand::MoveNodeAggregate(MoveNodeAggregate {
            workspace_name: workspace(),
            node_aggregate_id: NodeAggregateId::new("a"),
            new_parent_node_aggregate_id: NodeAggregateId::new("b"),
        });

        assert!(matches!(
            command.handle(&graph, ContentStreamId::new()),
            Err(NodeCommandError::CannotMoveIntoDescendant { .. })
        ));
    }

    #[test]
    fn events_are_addressed_to_the_given_content_stream() {
        let content_stream_id = ContentStreamId::new();
        let graph = graph_after(&[create("a", None)]);
        let command = RebasableCommand::RemoveNodeAggregate(RemoveNodeAggregate {
            workspace_name: workspace(),
            node_aggregate_id: NodeAggregateId::new("a"),
        });

        let events = command.handle(&graph, content_stream_id).unwrap();
        assert_eq!(
            events,
            vec![ContentRepositoryEvent::NodeAggregateWasRemoved(
                NodeAggregateWasRemovedData {
                    content_stream_id,
                    node_aggregate_id: NodeAggregateId::new("a"),
                }
            )]
        );
    }

    #[test]
    fn matches_node_id_and_retargeting() {
        let command = create("a", None);
        assert!(command.matches_node_id(&NodeAggregateId::new("a")));
        assert!(!command.matches_node_id(&NodeAggregateId::new("b")));

        let retargeted = command.for_workspace(WorkspaceName::live());
        assert_eq!(retargeted.workspace_name(), &WorkspaceName::live());
        assert_eq!(command.workspace_name(), &workspace());
    }
}
