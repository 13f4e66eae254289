//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use api::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use subscription::InMemorySubscriptionStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup() -> axum::Router {
    let state = Arc::new(AppState::new(
        InMemoryEventStore::new(),
        InMemorySubscriptionStore::new(),
        None,
    ));
    state.start().await.unwrap();
    api::create_app(state, get_metrics_handle())
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_workspace(app: &axum::Router, name: &str, base: Option<&str>) {
    let (status, _) = send(
        app,
        "POST",
        "/workspaces",
        Some(json!({ "workspace_name": name, "base_workspace_name": base })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn command(
    app: &axum::Router,
    workspace: &str,
    class: &str,
    payload: Value,
) -> StatusCode {
    let (status, _) = send(
        app,
        "POST",
        &format!("/workspaces/{workspace}/commands"),
        Some(json!({ "commandClass": class, "commandPayload": payload })),
    )
    .await;
    status
}

async fn create_node(app: &axum::Router, workspace: &str, node: &str) {
    let status = command(
        app,
        workspace,
        "CreateNodeAggregateWithNode",
        json!({
            "workspace_name": workspace,
            "node_aggregate_id": node,
            "node_type_name": "Page",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn node_ids(app: &axum::Router, workspace: &str) -> Vec<String> {
    let (status, json) = send(app, "GET", &format!("/workspaces/{workspace}/nodes"), None).await;
    assert_eq!(status, StatusCode::OK);
    json.as_array()
        .unwrap()
        .iter()
        .map(|node| node["node_aggregate_id"].as_str().unwrap().to_string())
        .collect()
}

/// `live` as root with `user` based on it.
async fn setup_with_workspaces() -> axum::Router {
    let app = setup().await;
    create_workspace(&app, "live", None).await;
    create_workspace(&app, "user", Some("live")).await;
    app
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["subscriptions_in_error"], json!([]));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_and_list_workspaces() {
    let app = setup_with_workspaces().await;

    let (status, json) = send(&app, "GET", "/workspaces/user", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["workspace_name"], "user");
    assert_eq!(json["base_workspace_name"], "live");
    assert_eq!(json["status"], "UP_TO_DATE");

    let (status, json) = send(&app, "GET", "/workspaces", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|ws| ws["workspace_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["live", "user"]);
}

#[tokio::test]
async fn test_create_workspace_validation() {
    let app = setup_with_workspaces().await;

    let (status, _) = send(
        &app,
        "POST",
        "/workspaces",
        Some(json!({ "workspace_name": " " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/workspaces",
        Some(json!({ "workspace_name": "user", "base_workspace_name": "live" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "POST",
        "/workspaces",
        Some(json!({ "workspace_name": "review", "base_workspace_name": "staging" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_workspace_is_not_found() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/workspaces/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nobody"));

    let (status, _) = send(&app, "POST", "/workspaces/nobody/publish", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_command_is_visible_in_workspace_only() {
    let app = setup_with_workspaces().await;

    create_node(&app, "user", "home").await;

    assert_eq!(node_ids(&app, "user").await, vec!["home"]);
    assert!(node_ids(&app, "live").await.is_empty());
}

#[tokio::test]
async fn test_invalid_command_is_rejected() {
    let app = setup_with_workspaces().await;

    let status = command(
        &app,
        "user",
        "SetNodeProperties",
        json!({
            "workspace_name": "user",
            "node_aggregate_id": "missing",
            "properties": { "title": "Hello" },
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_publish_moves_nodes_to_base() {
    let app = setup_with_workspaces().await;
    create_node(&app, "user", "home").await;
    create_node(&app, "user", "about").await;

    let (status, json) = send(&app, "POST", "/workspaces/user/publish", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(
        json["previous_content_stream_id"],
        json["new_content_stream_id"]
    );

    let mut live = node_ids(&app, "live").await;
    live.sort();
    assert_eq!(live, vec!["about", "home"]);

    let (_, json) = send(&app, "GET", "/workspaces/user", None).await;
    assert_eq!(json["status"], "UP_TO_DATE");
}

#[tokio::test]
async fn test_publish_and_discard_individual_nodes() {
    let app = setup_with_workspaces().await;
    create_node(&app, "user", "home").await;
    create_node(&app, "user", "about").await;
    create_node(&app, "user", "draft").await;

    let (status, _) = send(
        &app,
        "POST",
        "/workspaces/user/publish-nodes",
        Some(json!({ "node_ids": ["home"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node_ids(&app, "live").await, vec!["home"]);

    let (status, _) = send(
        &app,
        "POST",
        "/workspaces/user/discard-nodes",
        Some(json!({ "node_ids": ["draft"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut user = node_ids(&app, "user").await;
    user.sort();
    assert_eq!(user, vec!["about", "home"]);
}

#[tokio::test]
async fn test_discard_drops_all_changes() {
    let app = setup_with_workspaces().await;
    create_node(&app, "user", "home").await;

    let (status, _) = send(&app, "POST", "/workspaces/user/discard", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(node_ids(&app, "user").await.is_empty());
}

#[tokio::test]
async fn test_rebase_conflict_reports_failed_commands() {
    let app = setup_with_workspaces().await;
    create_workspace(&app, "editor", Some("live")).await;
    create_node(&app, "editor", "home").await;
    send(&app, "POST", "/workspaces/editor/publish", None).await;
    let (status, _) = send(&app, "POST", "/workspaces/user/rebase", None).await;
    assert_eq!(status, StatusCode::OK);

    let status = command(
        &app,
        "user",
        "SetNodeProperties",
        json!({
            "workspace_name": "user",
            "node_aggregate_id": "home",
            "properties": { "title": "Welcome" },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let status = command(
        &app,
        "editor",
        "RemoveNodeAggregate",
        json!({ "workspace_name": "editor", "node_aggregate_id": "home" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    send(&app, "POST", "/workspaces/editor/publish", None).await;

    let (status, json) = send(&app, "POST", "/workspaces/user/rebase", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["command"]["commandClass"], "SetNodeProperties");

    let (status, json) = send(
        &app,
        "POST",
        "/workspaces/user/rebase?strategy=force",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dropped_commands"].as_array().unwrap().len(), 1);

    let (_, json) = send(&app, "GET", "/workspaces/user", None).await;
    assert_eq!(json["status"], "UP_TO_DATE");
}

#[tokio::test]
async fn test_delete_workspace() {
    let app = setup_with_workspaces().await;

    let (status, _) = send(&app, "DELETE", "/workspaces/live", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "DELETE", "/workspaces/user", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", "/workspaces/user", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscription_statuses() {
    let app = setup_with_workspaces().await;
    create_node(&app, "user", "home").await;

    let (status, json) = send(&app, "GET", "/subscriptions", None).await;

    assert_eq!(status, StatusCode::OK);
    let reports = json.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["id"], "contentGraph");
    assert_eq!(reports[0]["status"], "ACTIVE");
    assert!(reports[0]["position"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_reset_and_boot_rebuild_the_read_model() {
    let app = setup_with_workspaces().await;
    create_node(&app, "user", "home").await;

    let (status, _) = send(&app, "POST", "/subscriptions/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&app, "GET", "/subscriptions?ids=contentGraph", None).await;
    assert_eq!(json[0]["status"], "BOOTING");
    assert!(node_ids(&app, "user").await.is_empty());

    let (status, json) = send(
        &app,
        "POST",
        "/subscriptions/boot?batch_size=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["number_of_processed_events"].as_u64().unwrap() > 0);
    assert_eq!(node_ids(&app, "user").await, vec!["home"]);
}

#[tokio::test]
async fn test_zero_batch_size_is_rejected() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/subscriptions/catch-up?batch_size=0",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("batch size"));
}
