use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventEnvelope, EventId, EventStoreError, NewEvent, Result, SequenceNumber, StreamName, Version,
    store::{
        CommitResult, EventStore, EventStream, ExpectedVersion, check_expected_version,
        validate_events_for_commit,
    },
};

/// Advisory lock key taken by every commit.
///
/// Commits are serialized so that sequence numbers become visible in
/// ascending order; catch-up relies on never seeing a gap filled later.
const COMMIT_LOCK_KEY: i64 = 0x636f_6e74_656e_74;

/// Rows fetched per round trip while streaming the log.
const STREAM_PAGE_SIZE: i64 = 500;

const SELECT_COLUMNS: &str = "SELECT sequence_number, event_id, stream_name, version, event_type, payload, metadata, causation_id, correlation_id, recorded_at FROM content_repository_events";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            metadata,
            causation_id: row.try_get("causation_id")?,
            correlation_id: row.try_get("correlation_id")?,
            stream_name: StreamName::new(row.try_get::<String, _>("stream_name")?),
            version: Version::new(row.try_get("version")?),
            sequence_number: SequenceNumber::new(row.try_get("sequence_number")?),
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

/// Paging state of [`PostgresEventStore::stream_all`].
struct LogCursor {
    pool: PgPool,
    next: SequenceNumber,
    buffer: VecDeque<EventEnvelope>,
    exhausted: bool,
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(stream = %stream, events = events.len()))]
    async fn commit(
        &self,
        stream: &StreamName,
        events: Vec<NewEvent>,
        expected: ExpectedVersion,
    ) -> Result<CommitResult> {
        validate_events_for_commit(stream, &events)?;
        let committed = events.len() as u64;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(COMMIT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM content_repository_events WHERE stream_name = $1",
        )
        .bind(stream.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let mut version = Version::new(current.unwrap_or(0));
        check_expected_version(stream, expected, version)?;

        let mut sequence_number = SequenceNumber::none();
        for event in events {
            version = version.next();
            let metadata_json = serde_json::to_value(&event.metadata)?;

            let inserted: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO content_repository_events
                    (event_id, stream_name, category, version, event_type, payload, metadata, causation_id, correlation_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING sequence_number
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(stream.as_str())
            .bind(stream.category())
            .bind(version.as_i64())
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(metadata_json)
            .bind(&event.causation_id)
            .bind(&event.correlation_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        stream: stream.clone(),
                        expected,
                        actual: version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            sequence_number = SequenceNumber::new(inserted);
        }

        tx.commit().await?;
        metrics::counter!("event_store_events_committed_total").increment(committed);

        Ok(CommitResult {
            highest_version: version,
            highest_sequence_number: sequence_number,
        })
    }

    async fn load(&self, stream: &StreamName) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE stream_name = $1 ORDER BY version ASC"
        ))
        .bind(stream.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn load_category(&self, category: &str) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE category = $1 ORDER BY sequence_number ASC"
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all(&self, from: SequenceNumber) -> Result<EventStream> {
        let cursor = LogCursor {
            pool: self.pool.clone(),
            next: from,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        let stream = futures_util::stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.buffer.is_empty() && !cursor.exhausted {
                let rows = sqlx::query(&format!(
                    "{SELECT_COLUMNS} WHERE sequence_number >= $1 ORDER BY sequence_number ASC LIMIT $2"
                ))
                .bind(cursor.next.as_i64())
                .bind(STREAM_PAGE_SIZE)
                .fetch_all(&cursor.pool)
                .await?;

                cursor.exhausted = (rows.len() as i64) < STREAM_PAGE_SIZE;
                for row in rows {
                    let event = PostgresEventStore::row_to_event(row)?;
                    cursor.next = event.sequence_number.next();
                    cursor.buffer.push_back(event);
                }
            }

            Ok::<_, EventStoreError>(cursor.buffer.pop_front().map(|event| (event, cursor)))
        });

        Ok(Box::pin(stream))
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM content_repository_events WHERE stream_name = $1",
        )
        .bind(stream.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(version.map(Version::new))
    }

    async fn head(&self) -> Result<SequenceNumber> {
        let head: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence_number) FROM content_repository_events")
                .fetch_one(&self.pool)
                .await?;

        Ok(head.map(SequenceNumber::new).unwrap_or_else(SequenceNumber::none))
    }
}
