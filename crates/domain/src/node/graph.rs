//! In-memory content graph of one content stream.

use std::collections::BTreeMap;

use common::{ContentStreamId, NodeAggregateId};
use event_store::{EventEnvelope, EventStore, StreamName, Version};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::{ContentRepositoryEvent, PropertyValues};

/// A node of the content graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: String,
    pub parent_node_aggregate_id: Option<NodeAggregateId>,
    pub properties: PropertyValues,

    /// Child node ids in insertion order.
    pub children: Vec<NodeAggregateId>,
}

/// Nodes of a content stream, as seen after folding its events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentGraph {
    nodes: BTreeMap<NodeAggregateId, Node>,
}

impl ContentGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a node by id.
    pub fn node(&self, id: &NodeAggregateId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Returns true if the node exists.
    pub fn contains(&self, id: &NodeAggregateId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Returns all nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns the nodes without parent, ordered by id.
    pub fn root_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .values()
            .filter(|node| node.parent_node_aggregate_id.is_none())
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `candidate` is `ancestor` or lies below it.
    pub fn is_descendant_or_self(
        &self,
        candidate: &NodeAggregateId,
        ancestor: &NodeAggregateId,
    ) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self
                .nodes
                .get(id)
                .and_then(|node| node.parent_node_aggregate_id.as_ref());
        }
        false
    }

    /// Applies a content event. Bookkeeping events are ignored.
    pub fn apply(&mut self, event: &ContentRepositoryEvent) {
        match event {
            ContentRepositoryEvent::NodeAggregateWithNodeWasCreated(data) => {
                if let Some(parent) = &data.parent_node_aggregate_id
                    && let Some(parent_node) = self.nodes.get_mut(parent)
                {
                    parent_node.children.push(data.node_aggregate_id.clone());
                }
                self.nodes.insert(
                    data.node_aggregate_id.clone(),
                    Node {
                        node_aggregate_id: data.node_aggregate_id.clone(),
                        node_type_name: data.node_type_name.clone(),
                        parent_node_aggregate_id: data.parent_node_aggregate_id.clone(),
                        properties: data.initial_properties.clone(),
                        children: Vec::new(),
                    },
                );
            }
            ContentRepositoryEvent::NodePropertiesWereSet(data) => {
                if let Some(node) = self.nodes.get_mut(&data.node_aggregate_id) {
                    node.properties.extend(data.properties.clone());
                }
            }
            ContentRepositoryEvent::NodeAggregateWasMoved(data) => {
                self.detach(&data.node_aggregate_id);
                if let Some(node) = self.nodes.get_mut(&data.node_aggregate_id) {
                    node.parent_node_aggregate_id = Some(data.new_parent_node_aggregate_id.clone());
                }
                if let Some(parent) = self.nodes.get_mut(&data.new_parent_node_aggregate_id) {
                    parent.children.push(data.node_aggregate_id.clone());
                }
            }
            ContentRepositoryEvent::NodeAggregateWasRemoved(data) => {
                self.detach(&data.node_aggregate_id);
                let mut pending = vec![data.node_aggregate_id.clone()];
                while let Some(id) = pending.pop() {
                    if let Some(node) = self.nodes.remove(&id) {
                        pending.extend(node.children);
                    }
                }
            }
            _ => {}
        }
    }

    /// Removes a node from its parent's child list.
    fn detach(&mut self, id: &NodeAggregateId) {
        let parent = self
            .nodes
            .get(id)
            .and_then(|node| node.parent_node_aggregate_id.clone());
        if let Some(parent) = parent
            && let Some(parent_node) = self.nodes.get_mut(&parent)
        {
            parent_node.children.retain(|child| child != id);
        }
    }
}

/// Loads the graph a content stream sees.
///
/// Walks the fork ancestry: a forked stream sees its source's events up to
/// the fork version, followed by its own events.
pub async fn load_content_graph<S>(
    store: &S,
    content_stream_id: ContentStreamId,
) -> Result<ContentGraph, DomainError>
where
    S: EventStore + ?Sized,
{
    // (events, version limit) from the stream itself up to the oldest ancestor
    let mut chain: Vec<(Vec<EventEnvelope>, Option<Version>)> = Vec::new();
    let mut next = Some((content_stream_id, None));

    while let Some((id, limit)) = next.take() {
        let events = store.load(&StreamName::for_content_stream(id)).await?;
        if let Some(first) = events.first()
            && let ContentRepositoryEvent::ContentStreamWasForked(data) =
                ContentRepositoryEvent::from_envelope(first)?
        {
            next = Some((
                data.source_content_stream_id,
                Some(data.version_of_source_content_stream),
            ));
        }
        chain.push((events, limit));
    }

    let mut graph = ContentGraph::new();
    for (events, limit) in chain.iter().rev() {
        for envelope in events {
            if limit.is_some_and(|limit| envelope.version > limit) {
                break;
            }
            graph.apply(&ContentRepositoryEvent::from_envelope(envelope)?);
        }
    }
    Ok(graph)
}
