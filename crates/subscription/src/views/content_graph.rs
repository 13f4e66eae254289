//! Content graph of every content stream, kept in memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ContentStreamId, NodeAggregateId};
use domain::{ContentGraph, ContentRepositoryEvent, Node};
use event_store::{EventEnvelope, Version};
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionState, ProjectionStatus};

/// Projects node events into one [`ContentGraph`] per content stream.
///
/// A forked content stream starts as a copy of its source's graph at the
/// version it was forked at, even if the source was written to before the
/// fork was projected. Removed content streams are dropped.
#[derive(Clone, Default)]
pub struct ContentGraphView {
    graphs: Arc<RwLock<HashMap<ContentStreamId, StreamGraph>>>,
}

/// Graph of one content stream with the node events that built it.
#[derive(Clone, Default)]
struct StreamGraph {
    /// The graph the stream started from.
    origin: ContentGraph,
    changes: Vec<(Version, ContentRepositoryEvent)>,
    current: ContentGraph,
}

impl StreamGraph {
    fn forked_from(origin: ContentGraph) -> Self {
        Self {
            current: origin.clone(),
            origin,
            changes: Vec::new(),
        }
    }

    fn apply(&mut self, event: &ContentRepositoryEvent, version: Version) {
        self.current.apply(event);
        self.changes.push((version, event.clone()));
    }

    /// Returns the graph as of the given stream version.
    fn at(&self, version: Version) -> ContentGraph {
        match self.changes.last() {
            Some((latest, _)) if *latest > version => {
                let mut graph = self.origin.clone();
                for (_, event) in self.changes.iter().take_while(|(v, _)| *v <= version) {
                    graph.apply(event);
                }
                graph
            }
            _ => self.current.clone(),
        }
    }
}

impl ContentGraphView {
    pub fn new() -> Self {
        Self::default()
    }

    // Query methods

    /// Returns the graph of a content stream.
    pub async fn graph(&self, content_stream_id: ContentStreamId) -> Option<ContentGraph> {
        self.graphs
            .read()
            .await
            .get(&content_stream_id)
            .map(|stream| stream.current.clone())
    }

    /// Returns a single node of a content stream.
    pub async fn node(
        &self,
        content_stream_id: ContentStreamId,
        node_aggregate_id: &NodeAggregateId,
    ) -> Option<Node> {
        self.graphs
            .read()
            .await
            .get(&content_stream_id)
            .and_then(|stream| stream.current.node(node_aggregate_id).cloned())
    }

    /// Returns the number of content streams with a graph.
    pub async fn content_stream_count(&self) -> usize {
        self.graphs.read().await.len()
    }
}

fn node_content_stream_id(event: &ContentRepositoryEvent) -> Option<ContentStreamId> {
    match event {
        ContentRepositoryEvent::NodeAggregateWithNodeWasCreated(data) => {
            Some(data.content_stream_id)
        }
        ContentRepositoryEvent::NodePropertiesWereSet(data) => Some(data.content_stream_id),
        ContentRepositoryEvent::NodeAggregateWasMoved(data) => Some(data.content_stream_id),
        ContentRepositoryEvent::NodeAggregateWasRemoved(data) => Some(data.content_stream_id),
        _ => None,
    }
}

#[async_trait]
impl Projection for ContentGraphView {
    async fn set_up(&self) -> Result<()> {
        Ok(())
    }

    async fn reset_state(&self) -> Result<()> {
        self.graphs.write().await.clear();
        Ok(())
    }

    async fn apply(&self, event: &ContentRepositoryEvent, envelope: &EventEnvelope) -> Result<()> {
        let mut graphs = self.graphs.write().await;

        match event {
            ContentRepositoryEvent::ContentStreamWasCreated(data) => {
                graphs.entry(data.content_stream_id).or_default();
            }
            ContentRepositoryEvent::ContentStreamWasForked(data) => {
                let origin = graphs
                    .get(&data.source_content_stream_id)
                    .map(|source| source.at(data.version_of_source_content_stream))
                    .unwrap_or_default();
                graphs.insert(data.new_content_stream_id, StreamGraph::forked_from(origin));
            }
            ContentRepositoryEvent::ContentStreamWasRemoved(data) => {
                graphs.remove(&data.content_stream_id);
            }
            event => {
                if let Some(content_stream_id) = node_content_stream_id(event) {
                    graphs
                        .entry(content_stream_id)
                        .or_default()
                        .apply(event, envelope.version);
                }
            }
        }

        Ok(())
    }

    async fn status(&self) -> ProjectionStatus {
        ProjectionStatus::Ok
    }

    fn state(&self) -> ProjectionState {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::event::{
        ContentStreamWasCreatedData, ContentStreamWasForkedData, ContentStreamWasRemovedData,
        NodeAggregateWithNodeWasCreatedData, NodePropertiesWereSetData,
    };
    use domain::PropertyValues;
    use event_store::{SequenceNumber, StreamName, Version};

    fn envelope(event: &ContentRepositoryEvent, sequence_number: i64) -> EventEnvelope {
        EventEnvelope::recorded(
            event.to_event_builder().unwrap().build(),
            StreamName::new("ContentStream:test"),
            Version::new(sequence_number),
            SequenceNumber::new(sequence_number),
        )
    }

    async fn apply_all(view: &ContentGraphView, events: &[ContentRepositoryEvent]) {
        for (index, event) in events.iter().enumerate() {
            view.apply(event, &envelope(event, index as i64 + 1))
                .await
                .unwrap();
        }
    }

    fn created(content_stream_id: ContentStreamId) -> ContentRepositoryEvent {
        ContentRepositoryEvent::ContentStreamWasCreated(ContentStreamWasCreatedData {
            content_stream_id,
        })
    }

    fn node_created(content_stream_id: ContentStreamId, id: &str) -> ContentRepositoryEvent {
        ContentRepositoryEvent::NodeAggregateWithNodeWasCreated(
            NodeAggregateWithNodeWasCreatedData {
                content_stream_id,
                node_aggregate_id: NodeAggregateId::new(id),
                node_type_name: "Document".to_string(),
                parent_node_aggregate_id: None,
                initial_properties: PropertyValues::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_nodes_are_projected_per_content_stream() {
        let view = ContentGraphView::new();
        let first = ContentStreamId::new();
        let second = ContentStreamId::new();

        apply_all(
            &view,
            &[
                created(first),
                created(second),
                node_created(first, "a"),
                node_created(second, "b"),
            ],
        )
        .await;

        assert_eq!(view.content_stream_count().await, 2);
        assert!(view.node(first, &NodeAggregateId::new("a")).await.is_some());
        assert!(view.node(first, &NodeAggregateId::new("b")).await.is_none());
        assert_eq!(view.graph(second).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fork_copies_source_graph() {
        let view = ContentGraphView::new();
        let source = ContentStreamId::new();
        let fork = ContentStreamId::new();

        apply_all(
            &view,
            &[
                created(source),
                node_created(source, "a"),
                ContentRepositoryEvent::ContentStreamWasForked(ContentStreamWasForkedData {
                    new_content_stream_id: fork,
                    source_content_stream_id: source,
                    version_of_source_content_stream: Version::new(2),
                }),
                ContentRepositoryEvent::NodePropertiesWereSet(NodePropertiesWereSetData {
                    content_stream_id: fork,
                    node_aggregate_id: NodeAggregateId::new("a"),
                    properties: PropertyValues::from([(
                        "title".to_string(),
                        serde_json::json!("changed"),
                    )]),
                }),
            ],
        )
        .await;

        let original = view.node(source, &NodeAggregateId::new("a")).await.unwrap();
        let forked = view.node(fork, &NodeAggregateId::new("a")).await.unwrap();
        assert!(original.properties.is_empty());
        assert_eq!(forked.properties["title"], serde_json::json!("changed"));
    }

    #[tokio::test]
    async fn test_fork_ignores_source_changes_after_fork_version() {
        let view = ContentGraphView::new();
        let source = ContentStreamId::new();
        let fork = ContentStreamId::new();

        // the source gains "b" after version 2 but before the fork is projected
        apply_all(
            &view,
            &[
                created(source),
                node_created(source, "a"),
                node_created(source, "b"),
                ContentRepositoryEvent::ContentStreamWasForked(ContentStreamWasForkedData {
                    new_content_stream_id: fork,
                    source_content_stream_id: source,
                    version_of_source_content_stream: Version::new(2),
                }),
            ],
        )
        .await;

        assert!(view.node(fork, &NodeAggregateId::new("a")).await.is_some());
        assert!(view.node(fork, &NodeAggregateId::new("b")).await.is_none());
        assert_eq!(view.graph(source).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_content_stream_is_dropped() {
        let view = ContentGraphView::new();
        let id = ContentStreamId::new();

        apply_all(
            &view,
            &[
                created(id),
                node_created(id, "a"),
                ContentRepositoryEvent::ContentStreamWasRemoved(ContentStreamWasRemovedData {
                    content_stream_id: id,
                }),
            ],
        )
        .await;

        assert!(view.graph(id).await.is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_all_graphs() {
        let view = ContentGraphView::new();
        let id = ContentStreamId::new();
        apply_all(&view, &[created(id), node_created(id, "a")]).await;

        view.reset_state().await.unwrap();

        assert_eq!(view.content_stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_state_shares_the_view() {
        let view = ContentGraphView::new();
        let id = ContentStreamId::new();

        let state = view.state().downcast::<ContentGraphView>().unwrap();
        apply_all(&view, &[created(id)]).await;

        assert_eq!(state.content_stream_count().await, 1);
    }
}
