//! Subscription status and engine endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use event_store::EventStore;
use serde::Deserialize;
use subscription::{
    ProcessedResult, SubscriptionCriteria, SubscriptionStatusReport, SubscriptionStore,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters shared by the subscription endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    /// Comma-separated subscription ids; all subscriptions if absent.
    pub ids: Option<String>,
    pub batch_size: Option<usize>,
}

impl SubscriptionQuery {
    fn criteria(&self) -> SubscriptionCriteria {
        match &self.ids {
            Some(ids) => SubscriptionCriteria::for_ids(
                ids.split(',').map(str::trim).filter(|id| !id.is_empty()),
            ),
            None => SubscriptionCriteria::all(),
        }
    }

    fn batch_size(&self, default: Option<usize>) -> Option<usize> {
        self.batch_size.or(default)
    }
}

/// GET /subscriptions — status of every subscription and its projection.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<Vec<SubscriptionStatusReport>>, ApiError> {
    let reports = state
        .engine
        .subscription_statuses(&query.criteria())
        .await?;
    Ok(Json(reports))
}

/// POST /subscriptions/setup — set up projections and register new subscribers.
#[tracing::instrument(skip(state))]
pub async fn setup<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<ProcessedResult>, ApiError> {
    Ok(Json(state.engine.setup(&query.criteria()).await?))
}

/// POST /subscriptions/boot — replay the log into booting subscriptions.
#[tracing::instrument(skip(state))]
pub async fn boot<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<ProcessedResult>, ApiError> {
    let result = state
        .engine
        .boot(&query.criteria(), query.batch_size(state.batch_size))
        .await?;
    Ok(Json(result))
}

/// POST /subscriptions/catch-up — bring active subscriptions up to date.
#[tracing::instrument(skip(state))]
pub async fn catch_up<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<ProcessedResult>, ApiError> {
    let result = state
        .engine
        .catch_up_active(&query.criteria(), query.batch_size(state.batch_size))
        .await?;
    Ok(Json(result))
}

/// POST /subscriptions/reset — reset projections; they replay on the next boot.
#[tracing::instrument(skip(state))]
pub async fn reset<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<ProcessedResult>, ApiError> {
    Ok(Json(state.engine.reset(&query.criteria()).await?))
}

/// POST /subscriptions/reactivate — retry subscriptions in error.
#[tracing::instrument(skip(state))]
pub async fn reactivate<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<ProcessedResult>, ApiError> {
    let result = state
        .engine
        .reactivate(&query.criteria(), query.batch_size(state.batch_size))
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use subscription::SubscriptionId;

    #[test]
    fn criteria_from_comma_separated_ids() {
        let query = SubscriptionQuery {
            ids: Some("contentGraph, search,".to_string()),
            batch_size: None,
        };
        let criteria = query.criteria();
        let ids = criteria.ids.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&SubscriptionId::new("search")));
    }

    #[test]
    fn batch_size_falls_back_to_configured_default() {
        let query = SubscriptionQuery::default();
        assert!(query.criteria().ids.is_none());
        assert_eq!(query.batch_size(Some(50)), Some(50));

        let query = SubscriptionQuery {
            ids: None,
            batch_size: Some(10),
        };
        assert_eq!(query.batch_size(Some(50)), Some(10));
    }
}
