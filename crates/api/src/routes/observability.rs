//! Health and Prometheus metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use subscription::{SubscriptionCriteria, SubscriptionStatus, SubscriptionStore};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while a subscription is in error.
    pub status: &'static str,
    pub subscriptions_in_error: Vec<String>,
}

/// GET /health — returns system health status.
pub async fn health<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let failing: Vec<String> = state
        .engine
        .subscription_statuses(&SubscriptionCriteria::all())
        .await?
        .into_iter()
        .filter(|report| report.status == SubscriptionStatus::Error)
        .map(|report| report.id.to_string())
        .collect();

    Ok(Json(HealthResponse {
        status: if failing.is_empty() { "ok" } else { "degraded" },
        subscriptions_in_error: failing,
    }))
}

/// GET /metrics — returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
