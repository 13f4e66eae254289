//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{ContentStreamError, DomainError, WorkspaceLifecycleError};
use subscription::SubscriptionEngineError;
use workspace::WorkspaceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Workspace operation error.
    Workspace(WorkspaceError),
    /// Subscription engine error.
    Subscription(SubscriptionEngineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Workspace(err) => {
                if let WorkspaceError::WorkspaceRebaseFailed { errors, .. } = &err {
                    details = serde_json::to_value(errors).ok();
                }
                workspace_error_to_response(err)
            }
            ApiError::Subscription(err) => subscription_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }
        metrics::counter!("http_errors_total", "status" => status.as_u16().to_string())
            .increment(1);

        let body = match details {
            Some(errors) => serde_json::json!({ "error": message, "errors": errors }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Workspace(workspace_err) => match workspace_err {
            WorkspaceLifecycleError::WorkspaceDoesNotExist(_)
            | WorkspaceLifecycleError::BaseWorkspaceDoesNotExist(_) => StatusCode::NOT_FOUND,
            WorkspaceLifecycleError::WorkspaceAlreadyExists(_) => StatusCode::CONFLICT,
        },
        DomainError::ContentStream(content_stream_err) => match content_stream_err {
            ContentStreamError::ContentStreamDoesNotExist(_) => StatusCode::NOT_FOUND,
            ContentStreamError::ContentStreamAlreadyExists(_)
            | ContentStreamError::ContentStreamIsClosed(_)
            | ContentStreamError::ContentStreamIsRemoved(_)
            | ContentStreamError::ContentStreamStillInUse { .. } => StatusCode::CONFLICT,
        },
        DomainError::NodeCommand(_) => StatusCode::UNPROCESSABLE_ENTITY,
        err if err.is_conflict() => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn workspace_error_to_response(err: WorkspaceError) -> (StatusCode, String) {
    if let WorkspaceError::Domain(domain_err) = err {
        return domain_error_to_response(domain_err);
    }

    let status = match &err {
        WorkspaceError::WorkspaceNotFound(_) => StatusCode::NOT_FOUND,
        WorkspaceError::WorkspaceHasNoBase(_) => StatusCode::BAD_REQUEST,
        WorkspaceError::WorkspaceRebaseFailed { .. }
        | WorkspaceError::ConcurrencyConflict(_)
        | WorkspaceError::WorkspaceAlreadyExists(_)
        | WorkspaceError::WorkspaceHasDependents { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn subscription_error_to_response(err: SubscriptionEngineError) -> (StatusCode, String) {
    match &err {
        SubscriptionEngineError::InvalidBatchSize(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(err: WorkspaceError) -> Self {
        ApiError::Workspace(err)
    }
}

impl From<SubscriptionEngineError> for ApiError {
    fn from(err: SubscriptionEngineError) -> Self {
        ApiError::Subscription(err)
    }
}
