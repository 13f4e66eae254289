//! Workspace lifecycle and node command endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ContentStreamId, NodeAggregateId, WorkspaceName};
use domain::{ContentRepositoryEvent, Node, RebasableCommand, WorkspaceDescription};
use event_store::{EventStore, SequenceNumber};
use serde::{Deserialize, Serialize};
use subscription::SubscriptionStore;
use workspace::{RebaseErrorHandlingStrategy, WorkspaceChange};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub workspace_name: String,
    pub base_workspace_name: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct RebaseQuery {
    #[serde(default)]
    pub strategy: RebaseErrorHandlingStrategy,
}

#[derive(Deserialize)]
pub struct NodesRequest {
    pub node_ids: Vec<NodeAggregateId>,
}

// -- Response types --

#[derive(Serialize)]
pub struct WorkspaceResponse {
    pub workspace_name: String,
    pub base_workspace_name: Option<String>,
    pub content_stream_id: String,
    pub status: String,
}

impl From<WorkspaceDescription> for WorkspaceResponse {
    fn from(description: WorkspaceDescription) -> Self {
        Self {
            workspace_name: description.workspace_name.to_string(),
            base_workspace_name: description.base_workspace_name.map(|b| b.to_string()),
            content_stream_id: description.current_content_stream_id.to_string(),
            status: description.status.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub content_stream_id: ContentStreamId,
    pub events: Vec<ContentRepositoryEvent>,
    pub sequence_number: SequenceNumber,
}

// -- Handlers --

/// GET /workspaces — all workspaces with their status.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
) -> Result<Json<Vec<WorkspaceResponse>>, ApiError> {
    let workspaces = state.workspaces.workspaces().find_all().await?;
    Ok(Json(workspaces.into_iter().map(Into::into).collect()))
}

/// POST /workspaces — create a root workspace, or one based on another.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<WorkspaceResponse>), ApiError> {
    let name = parse_workspace_name(&req.workspace_name)?;
    let content_stream_id = ContentStreamId::new();

    match req.base_workspace_name.as_deref() {
        Some(base) => {
            let base = parse_workspace_name(base)?;
            state
                .workspaces
                .create_workspace(&name, &base, content_stream_id)
                .await?;
        }
        None => {
            state
                .workspaces
                .create_root_workspace(&name, content_stream_id)
                .await?;
        }
    }
    state.catch_up().await?;

    let description = find_workspace(&state, &name).await?;
    Ok((StatusCode::CREATED, Json(description.into())))
}

/// GET /workspaces/{name} — a single workspace.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
) -> Result<Json<WorkspaceResponse>, ApiError> {
    let name = parse_workspace_name(&name)?;
    Ok(Json(find_workspace(&state, &name).await?.into()))
}

/// DELETE /workspaces/{name} — remove a workspace and its content stream.
#[tracing::instrument(skip(state))]
pub async fn delete<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let name = parse_workspace_name(&name)?;
    state.workspaces.delete_workspace(&name).await?;
    state.catch_up().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /workspaces/{name}/rebase — replay changes onto the current base.
#[tracing::instrument(skip(state, query))]
pub async fn rebase<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
    Query(query): Query<RebaseQuery>,
) -> Result<Json<WorkspaceChange>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let change = state
        .workspaces
        .rebase_workspace(&name, query.strategy)
        .await?;
    state.catch_up().await?;
    Ok(Json(change))
}

/// POST /workspaces/{name}/publish — move all changes into the base.
#[tracing::instrument(skip(state))]
pub async fn publish<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
) -> Result<Json<WorkspaceChange>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let change = state.workspaces.publish_workspace(&name).await?;
    state.catch_up().await?;
    Ok(Json(change))
}

/// POST /workspaces/{name}/publish-nodes — move the changes of some nodes into the base.
#[tracing::instrument(skip(state, req))]
pub async fn publish_nodes<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
    Json(req): Json<NodesRequest>,
) -> Result<Json<WorkspaceChange>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let change = state
        .workspaces
        .publish_individual_nodes(&name, &req.node_ids)
        .await?;
    state.catch_up().await?;
    Ok(Json(change))
}

/// POST /workspaces/{name}/discard — drop all changes.
#[tracing::instrument(skip(state))]
pub async fn discard<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
) -> Result<Json<WorkspaceChange>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let change = state.workspaces.discard_workspace(&name).await?;
    state.catch_up().await?;
    Ok(Json(change))
}

/// POST /workspaces/{name}/discard-nodes — drop the changes of some nodes.
#[tracing::instrument(skip(state, req))]
pub async fn discard_nodes<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
    Json(req): Json<NodesRequest>,
) -> Result<Json<WorkspaceChange>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let change = state
        .workspaces
        .discard_individual_nodes(&name, &req.node_ids)
        .await?;
    state.catch_up().await?;
    Ok(Json(change))
}

/// POST /workspaces/{name}/commands — handle a node command in the workspace.
#[tracing::instrument(skip(state, command))]
pub async fn command<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
    Json(command): Json<RebasableCommand>,
) -> Result<(StatusCode, Json<CommandResponse>), ApiError> {
    let name = parse_workspace_name(&name)?;
    let result = state.nodes.handle(command.for_workspace(name)).await?;
    state.catch_up().await?;

    let response = CommandResponse {
        content_stream_id: result.content_stream_id,
        events: result.events,
        sequence_number: result.commit.highest_sequence_number,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /workspaces/{name}/nodes — nodes of the workspace from the content graph read model.
#[tracing::instrument(skip(state))]
pub async fn nodes<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S, T>>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Node>>, ApiError> {
    let name = parse_workspace_name(&name)?;
    let description = find_workspace(&state, &name).await?;

    let nodes = state
        .content_graph
        .graph(description.current_content_stream_id)
        .await
        .map(|graph| graph.nodes().cloned().collect())
        .unwrap_or_default();
    Ok(Json(nodes))
}

// -- Helpers --

fn parse_workspace_name(name: &str) -> Result<WorkspaceName, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest(
            "Workspace name must not be empty".to_string(),
        ));
    }
    Ok(WorkspaceName::new(name))
}

async fn find_workspace<S: EventStore + Clone + 'static, T: SubscriptionStore + 'static>(
    state: &AppState<S, T>,
    name: &WorkspaceName,
) -> Result<WorkspaceDescription, ApiError> {
    state
        .workspaces
        .workspaces()
        .find(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workspace {name} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_names_are_trimmed_and_required() {
        assert_eq!(
            parse_workspace_name(" user ").unwrap(),
            WorkspaceName::new("user")
        );
        assert!(matches!(
            parse_workspace_name("  "),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn rebase_strategy_defaults_to_fail() {
        let query = RebaseQuery::default();
        assert_eq!(query.strategy, RebaseErrorHandlingStrategy::Fail);
    }
}
