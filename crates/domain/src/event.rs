//! Content repository domain events.
//!
//! Every event of the repository is one variant of [`ContentRepositoryEvent`].
//! Events are stored adjacently tagged (`{"type": ..., "data": ...}`) and the
//! variant name doubles as the stored event type.

use std::collections::BTreeMap;

use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use event_store::{EventEnvelope, NewEvent, NewEventBuilder, Version};
use serde::{Deserialize, Serialize};

/// Property values of a node, keyed by property name.
pub type PropertyValues = BTreeMap<String, serde_json::Value>;

/// Events that can occur in the content repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ContentRepositoryEvent {
    /// An empty content stream was created.
    ContentStreamWasCreated(ContentStreamWasCreatedData),

    /// A content stream was forked off another one at a given version.
    ContentStreamWasForked(ContentStreamWasForkedData),

    /// A content stream stopped accepting writes.
    ContentStreamWasClosed(ContentStreamWasClosedData),

    /// A closed content stream accepts writes again.
    ContentStreamWasReopened(ContentStreamWasReopenedData),

    /// A content stream was retired.
    ContentStreamWasRemoved(ContentStreamWasRemovedData),

    /// A workspace without base was created.
    RootWorkspaceWasCreated(RootWorkspaceWasCreatedData),

    /// A workspace based on another workspace was created.
    WorkspaceWasCreated(WorkspaceWasCreatedData),

    /// A workspace moved onto a content stream forked from its base's latest state.
    WorkspaceWasRebased(WorkspaceWasRebasedData),

    /// All changes of a workspace were published to its base.
    WorkspaceWasPublished(WorkspaceWasPublishedData),

    /// The changes to some nodes of a workspace were published to its base.
    WorkspaceWasPartiallyPublished(WorkspaceWasPartiallyPublishedData),

    /// All changes of a workspace were thrown away.
    WorkspaceWasDiscarded(WorkspaceWasDiscardedData),

    /// The changes to some nodes of a workspace were thrown away.
    WorkspaceWasPartiallyDiscarded(WorkspaceWasPartiallyDiscardedData),

    /// A workspace was deleted.
    WorkspaceWasRemoved(WorkspaceWasRemovedData),

    /// A node was created.
    NodeAggregateWithNodeWasCreated(NodeAggregateWithNodeWasCreatedData),

    /// Properties of a node were set.
    NodePropertiesWereSet(NodePropertiesWereSetData),

    /// A node was moved below another parent.
    NodeAggregateWasMoved(NodeAggregateWasMovedData),

    /// A node and all its descendants were removed.
    NodeAggregateWasRemoved(NodeAggregateWasRemovedData),
}

impl ContentRepositoryEvent {
    /// Returns the event type name, used as the stored event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentStreamWasCreated(_) => "ContentStreamWasCreated",
            Self::ContentStreamWasForked(_) => "ContentStreamWasForked",
            Self::ContentStreamWasClosed(_) => "ContentStreamWasClosed",
            Self::ContentStreamWasReopened(_) => "ContentStreamWasReopened",
            Self::ContentStreamWasRemoved(_) => "ContentStreamWasRemoved",
            Self::RootWorkspaceWasCreated(_) => "RootWorkspaceWasCreated",
            Self::WorkspaceWasCreated(_) => "WorkspaceWasCreated",
            Self::WorkspaceWasRebased(_) => "WorkspaceWasRebased",
            Self::WorkspaceWasPublished(_) => "WorkspaceWasPublished",
            Self::WorkspaceWasPartiallyPublished(_) => "WorkspaceWasPartiallyPublished",
            Self::WorkspaceWasDiscarded(_) => "WorkspaceWasDiscarded",
            Self::WorkspaceWasPartiallyDiscarded(_) => "WorkspaceWasPartiallyDiscarded",
            Self::WorkspaceWasRemoved(_) => "WorkspaceWasRemoved",
            Self::NodeAggregateWithNodeWasCreated(_) => "NodeAggregateWithNodeWasCreated",
            Self::NodePropertiesWereSet(_) => "NodePropertiesWereSet",
            Self::NodeAggregateWasMoved(_) => "NodeAggregateWasMoved",
            Self::NodeAggregateWasRemoved(_) => "NodeAggregateWasRemoved",
        }
    }

    /// Decodes the event stored in an envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        Self::deserialize(&envelope.payload)
    }

    /// Starts building the stored form of this event.
    pub fn to_event_builder(&self) -> Result<NewEventBuilder, serde_json::Error> {
        NewEvent::builder().event_type(self.event_type()).payload(self)
    }

    /// Returns a copy of this event addressed to another content stream.
    ///
    /// Only events that change content can be published to a workspace;
    /// content stream and workspace bookkeeping returns `None`.
    pub fn with_content_stream_id(&self, content_stream_id: ContentStreamId) -> Option<Self> {
        let mut event = self.clone();
        match &mut event {
            Self::NodeAggregateWithNodeWasCreated(data) => {
                data.content_stream_id = content_stream_id
            }
            Self::NodePropertiesWereSet(data) => data.content_stream_id = content_stream_id,
            Self::NodeAggregateWasMoved(data) => data.content_stream_id = content_stream_id,
            Self::NodeAggregateWasRemoved(data) => data.content_stream_id = content_stream_id,
            _ => return None,
        }
        Some(event)
    }

    /// Returns true for events that change content and can be published.
    pub fn is_publishable(&self) -> bool {
        matches!(
            self,
            Self::NodeAggregateWithNodeWasCreated(_)
                | Self::NodePropertiesWereSet(_)
                | Self::NodeAggregateWasMoved(_)
                | Self::NodeAggregateWasRemoved(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamWasCreatedData {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamWasForkedData {
    /// The content stream that was created by the fork.
    pub new_content_stream_id: ContentStreamId,

    /// The content stream the fork starts from.
    pub source_content_stream_id: ContentStreamId,

    /// Version of the source stream at the moment of the fork.
    ///
    /// The forked stream sees exactly the source events up to this version.
    pub version_of_source_content_stream: Version,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamWasClosedData {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamWasReopenedData {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamWasRemovedData {
    pub content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootWorkspaceWasCreatedData {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasCreatedData {
    pub workspace_name: WorkspaceName,
    pub base_workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasRebasedData {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasPublishedData {
    /// The workspace whose changes were published.
    pub source_workspace_name: WorkspaceName,

    /// The base workspace that received the changes.
    pub target_workspace_name: WorkspaceName,

    /// The content stream the source workspace continues on.
    pub new_source_content_stream_id: ContentStreamId,

    pub previous_source_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasPartiallyPublishedData {
    pub source_workspace_name: WorkspaceName,
    pub target_workspace_name: WorkspaceName,
    pub new_source_content_stream_id: ContentStreamId,
    pub previous_source_content_stream_id: ContentStreamId,

    /// The nodes whose changes were published.
    pub published_nodes: Vec<NodeAggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasDiscardedData {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasPartiallyDiscardedData {
    pub workspace_name: WorkspaceName,
    pub new_content_stream_id: ContentStreamId,
    pub previous_content_stream_id: ContentStreamId,

    /// The nodes whose changes were discarded.
    pub discarded_nodes: Vec<NodeAggregateId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceWasRemovedData {
    pub workspace_name: WorkspaceName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAggregateWithNodeWasCreatedData {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: String,

    /// `None` for root nodes.
    pub parent_node_aggregate_id: Option<NodeAggregateId>,

    #[serde(default)]
    pub initial_properties: PropertyValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePropertiesWereSetData {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub properties: PropertyValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAggregateWasMovedData {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub new_parent_node_aggregate_id: NodeAggregateId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAggregateWasRemovedData {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
}
