//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use event_store::{
    EventStore, EventStoreError, EventStoreExt, ExpectedVersion, NewEvent, PostgresEventStore,
    SequenceNumber, StreamName, Version,
};
use futures_util::StreamExt;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_events_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and a cleared log
async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE content_repository_events RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::new(pool)
}

fn create_test_event(event_type: &str) -> NewEvent {
    NewEvent::builder()
        .event_type(event_type)
        .payload_raw(serde_json::json!({"test": true}))
        .build()
}

#[tokio::test]
#[serial]
async fn commit_and_load_stream() {
    let store = get_test_store().await;
    let stream = StreamName::new("ContentStream:a");

    let result = store
        .commit(
            &stream,
            vec![create_test_event("E1"), create_test_event("E2")],
            ExpectedVersion::NoStream,
        )
        .await
        .unwrap();
    assert_eq!(result.highest_version, Version::new(2));
    assert_eq!(result.highest_sequence_number, SequenceNumber::new(2));

    let events = store.load(&stream).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, "E1");
    assert_eq!(events[0].version, Version::first());
    assert_eq!(events[1].sequence_number, SequenceNumber::new(2));
}

#[tokio::test]
#[serial]
async fn optimistic_concurrency_conflict() {
    let store = get_test_store().await;
    let stream = StreamName::new("ContentStream:a");

    store
        .commit_event(&stream, create_test_event("E1"), ExpectedVersion::NoStream)
        .await
        .unwrap();

    let result = store
        .commit_event(
            &stream,
            create_test_event("E2"),
            ExpectedVersion::Exact(Version::new(5)),
        )
        .await;

    assert!(matches!(
        result,
        Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::first()
    ));
    assert_eq!(
        store.stream_version(&stream).await.unwrap(),
        Some(Version::first())
    );
}

#[tokio::test]
#[serial]
async fn concurrent_writers_to_one_stream_are_serialized() {
    let store = get_test_store().await;
    let stream = StreamName::new("ContentStream:a");
    store
        .commit_event(&stream, create_test_event("E1"), ExpectedVersion::NoStream)
        .await
        .unwrap();

    let first = store.commit_event(
        &stream,
        create_test_event("A"),
        ExpectedVersion::Exact(Version::first()),
    );
    let second = store.commit_event(
        &stream,
        create_test_event("B"),
        ExpectedVersion::Exact(Version::first()),
    );
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok() != second.is_ok());
    assert_eq!(
        store.stream_version(&stream).await.unwrap(),
        Some(Version::new(2))
    );
}

#[tokio::test]
#[serial]
async fn load_category_and_head() {
    let store = get_test_store().await;
    assert_eq!(store.head().await.unwrap(), SequenceNumber::none());

    for name in ["Workspace:live", "ContentStream:x", "Workspace:user"] {
        store
            .commit_event(
                &StreamName::new(name),
                create_test_event("E"),
                ExpectedVersion::Any,
            )
            .await
            .unwrap();
    }

    let workspaces = store.load_category("Workspace").await.unwrap();
    assert_eq!(workspaces.len(), 2);
    assert_eq!(workspaces[1].stream_name.as_str(), "Workspace:user");
    assert_eq!(store.head().await.unwrap(), SequenceNumber::new(3));
}

#[tokio::test]
#[serial]
async fn stream_all_pages_through_the_log() {
    let store = get_test_store().await;
    let stream = StreamName::new("ContentStream:a");
    let events: Vec<_> = (0..1200)
        .map(|i| create_test_event(&format!("E{i}")))
        .collect();
    store
        .commit(&stream, events, ExpectedVersion::NoStream)
        .await
        .unwrap();

    let all: Vec<_> = store
        .stream_all(SequenceNumber::new(100))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(all.len(), 1101);
    let first = all.first().unwrap().as_ref().unwrap();
    let last = all.last().unwrap().as_ref().unwrap();
    assert_eq!(first.sequence_number, SequenceNumber::new(100));
    assert_eq!(last.sequence_number, SequenceNumber::new(1200));
}

#[tokio::test]
#[serial]
async fn event_metadata_preserved() {
    let store = get_test_store().await;
    let stream = StreamName::new("ContentStream:a");

    let event = NewEvent::builder()
        .event_type("NodePropertiesWereSet")
        .payload_raw(serde_json::json!({"node": "n1"}))
        .metadata("commandClass", serde_json::json!("SetNodeProperties"))
        .metadata("commandPayload", serde_json::json!({"node_aggregate_id": "n1"}))
        .causation_id("command-1")
        .correlation_id("request-7")
        .build();

    store
        .commit_event(&stream, event, ExpectedVersion::NoStream)
        .await
        .unwrap();

    let loaded = store.load(&stream).await.unwrap();
    let loaded = &loaded[0];
    assert_eq!(
        loaded.metadata.get("commandClass"),
        Some(&serde_json::json!("SetNodeProperties"))
    );
    assert_eq!(loaded.causation_id.as_deref(), Some("command-1"));
    assert_eq!(loaded.correlation_id.as_deref(), Some("request-7"));
}
