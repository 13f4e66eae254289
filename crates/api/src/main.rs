//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use sqlx::postgres::PgPoolOptions;
use subscription::{InMemorySubscriptionStore, PostgresSubscriptionStore, SubscriptionStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Opens the configured stores: PostgreSQL if a database URL is set, in-memory otherwise.
async fn open_stores(config: &Config) -> (Arc<dyn EventStore>, Arc<dyn SubscriptionStore>) {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory stores");
        return (
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySubscriptionStore::new()),
        );
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .expect("failed to connect to PostgreSQL");
    let event_store = PostgresEventStore::new(pool.clone());
    event_store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL");

    (
        Arc::new(event_store),
        Arc::new(PostgresSubscriptionStore::new(pool)),
    )
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open stores and boot subscriptions
    let (event_store, subscription_store) = open_stores(&config).await;
    let state = Arc::new(AppState::new(
        event_store,
        subscription_store,
        config.catch_up_batch_size,
    ));
    state.start().await.expect("failed to start subscriptions");

    // 4. Build the application
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
