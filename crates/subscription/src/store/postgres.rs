use async_trait::async_trait;
use event_store::SequenceNumber;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::{Result, SubscriptionStore};
use crate::error::SubscriptionStoreError;
use crate::subscription::{
    Subscription, SubscriptionCriteria, SubscriptionError, SubscriptionId, SubscriptionStatus,
    Subscriptions,
};

const CREATE_TABLE: &str = include_str!("../../../../migrations/002_create_subscriptions_table.sql");

const SELECT_COLUMNS: &str = "SELECT id, status, position, error_message, error_previous_status, error_trace, setup_hash, last_saved_at FROM content_repository_subscriptions";

/// PostgreSQL-backed subscription store.
#[derive(Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    /// Creates a new store on the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_subscription(row: PgRow) -> Result<Subscription> {
        let status: String = row.try_get("status")?;
        let error_message: Option<String> = row.try_get("error_message")?;
        let error = match error_message {
            Some(error_message) => {
                let previous: Option<String> = row.try_get("error_previous_status")?;
                Some(SubscriptionError {
                    previous_status: previous
                        .as_deref()
                        .unwrap_or(SubscriptionStatus::Active.as_str())
                        .parse()?,
                    error_message,
                    error_trace: row.try_get("error_trace")?,
                })
            }
            None => None,
        };

        Ok(Subscription {
            id: SubscriptionId::new(row.try_get::<String, _>("id")?),
            status: status.parse()?,
            position: SequenceNumber::new(row.try_get("position")?),
            error,
            setup_hash: row.try_get("setup_hash")?,
            last_saved_at: row.try_get("last_saved_at")?,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    #[tracing::instrument(skip(self))]
    async fn setup(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        let ids: Option<Vec<String>> = criteria
            .ids
            .as_ref()
            .map(|ids| ids.iter().map(|id| id.as_str().to_string()).collect());
        let statuses: Option<Vec<String>> = criteria.statuses.as_ref().map(|statuses| {
            statuses
                .iter()
                .map(|status| status.as_str().to_string())
                .collect()
        });

        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE ($1::TEXT[] IS NULL OR id = ANY($1)) AND ($2::TEXT[] IS NULL OR status = ANY($2)) ORDER BY id"
        ))
        .bind(ids)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(Self::row_to_subscription)
            .collect::<Result<Vec<_>>>()
            .map(Subscriptions::new)
    }

    #[tracing::instrument(skip_all, fields(subscription = %subscription.id))]
    async fn add(&self, subscription: Subscription) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO content_repository_subscriptions (id, status, position, setup_hash, last_saved_at) VALUES ($1, $2, $3, $4, NOW()) ON CONFLICT (id) DO NOTHING",
        )
        .bind(subscription.id.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.position.as_i64())
        .bind(subscription.setup_hash.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SubscriptionStoreError::AlreadyExists(subscription.id));
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(subscription = %id, status = %status, position = %position))]
    async fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE content_repository_subscriptions
            SET status = $2, position = $3, error_message = $4, error_previous_status = $5,
                error_trace = $6, last_saved_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .bind(position.as_i64())
        .bind(error.as_ref().map(|e| e.error_message.as_str()))
        .bind(error.as_ref().map(|e| e.previous_status.as_str()))
        .bind(error.as_ref().and_then(|e| e.error_trace.as_deref()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SubscriptionStoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn update_setup_hash(
        &self,
        id: &SubscriptionId,
        setup_hash: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE content_repository_subscriptions SET setup_hash = $2, last_saved_at = NOW() WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(setup_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SubscriptionStoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}
