//! Shared application state.

use std::sync::Arc;

use domain::NodeCommandHandler;
use event_store::EventStore;
use subscription::{
    ContentGraphView, ProcessedResult, Subscriber, SubscriptionCriteria, SubscriptionEngine,
    SubscriptionEngineError, SubscriptionStore, Subscribers,
};
use workspace::WorkspaceCoordinator;

/// Subscription id of the content graph read model.
pub const CONTENT_GRAPH_SUBSCRIPTION: &str = "contentGraph";

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore + Clone, T: SubscriptionStore> {
    pub workspaces: WorkspaceCoordinator<S>,
    pub nodes: NodeCommandHandler<S>,
    pub engine: SubscriptionEngine<S, T>,
    pub content_graph: ContentGraphView,

    /// Batch size for catch-up runs; `None` processes everything at once.
    pub batch_size: Option<usize>,
}

impl<S: EventStore + Clone, T: SubscriptionStore> AppState<S, T> {
    /// Wires the write side and the subscribers over the given stores.
    pub fn new(event_store: S, subscription_store: T, batch_size: Option<usize>) -> Self {
        let content_graph = ContentGraphView::new();
        let mut subscribers = Subscribers::new();
        subscribers.register(Subscriber::new(
            CONTENT_GRAPH_SUBSCRIPTION,
            Arc::new(content_graph.clone()),
        ));

        Self {
            workspaces: WorkspaceCoordinator::new(event_store.clone()),
            nodes: NodeCommandHandler::new(event_store.clone()),
            engine: SubscriptionEngine::new(event_store, subscription_store, subscribers),
            content_graph,
            batch_size,
        }
    }

    /// Sets up all subscriptions and boots them up to the head of the log.
    pub async fn start(&self) -> Result<ProcessedResult, SubscriptionEngineError> {
        let criteria = SubscriptionCriteria::all();
        let setup = self.engine.setup(&criteria).await?;
        log_failures("setup", &setup);

        let boot = self.engine.boot(&criteria, self.batch_size).await?;
        log_failures("boot", &boot);
        tracing::info!(
            events = boot.number_of_processed_events,
            "subscriptions booted"
        );
        Ok(boot)
    }

    /// Brings active subscriptions up to date after a write.
    ///
    /// Projection failures are recorded on the subscriptions and do not fail
    /// the request.
    pub async fn catch_up(&self) -> Result<ProcessedResult, SubscriptionEngineError> {
        let result = self
            .engine
            .catch_up_active(&SubscriptionCriteria::all(), self.batch_size)
            .await?;
        log_failures("catch-up", &result);
        Ok(result)
    }
}

fn log_failures(operation: &str, result: &ProcessedResult) {
    for error in result.errors() {
        tracing::warn!(
            operation,
            subscription = %error.subscription_id,
            error = %error.message,
            "subscriber failed"
        );
    }
}
