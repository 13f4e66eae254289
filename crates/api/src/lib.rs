//! HTTP API of the content repository.
//!
//! Exposes workspace branching (create, rebase, publish, discard), node
//! commands, the content graph read model and the subscription engine, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use subscription::SubscriptionStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    state: Arc<AppState<S, T>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::observability::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::observability::health::<S, T>))
        .route(
            "/workspaces",
            get(routes::workspaces::list::<S, T>).post(routes::workspaces::create::<S, T>),
        )
        .route(
            "/workspaces/{name}",
            get(routes::workspaces::get::<S, T>).delete(routes::workspaces::delete::<S, T>),
        )
        .route(
            "/workspaces/{name}/rebase",
            post(routes::workspaces::rebase::<S, T>),
        )
        .route(
            "/workspaces/{name}/publish",
            post(routes::workspaces::publish::<S, T>),
        )
        .route(
            "/workspaces/{name}/publish-nodes",
            post(routes::workspaces::publish_nodes::<S, T>),
        )
        .route(
            "/workspaces/{name}/discard",
            post(routes::workspaces::discard::<S, T>),
        )
        .route(
            "/workspaces/{name}/discard-nodes",
            post(routes::workspaces::discard_nodes::<S, T>),
        )
        .route(
            "/workspaces/{name}/commands",
            post(routes::workspaces::command::<S, T>),
        )
        .route(
            "/workspaces/{name}/nodes",
            get(routes::workspaces::nodes::<S, T>),
        )
        .route("/subscriptions", get(routes::subscriptions::list::<S, T>))
        .route(
            "/subscriptions/setup",
            post(routes::subscriptions::setup::<S, T>),
        )
        .route(
            "/subscriptions/boot",
            post(routes::subscriptions::boot::<S, T>),
        )
        .route(
            "/subscriptions/catch-up",
            post(routes::subscriptions::catch_up::<S, T>),
        )
        .route(
            "/subscriptions/reset",
            post(routes::subscriptions::reset::<S, T>),
        )
        .route(
            "/subscriptions/reactivate",
            post(routes::subscriptions::reactivate::<S, T>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
