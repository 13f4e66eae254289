//! Durable subscription state.

mod memory;
mod postgres;

pub use memory::InMemorySubscriptionStore;
pub use postgres::PostgresSubscriptionStore;

use std::sync::Arc;

use async_trait::async_trait;
use event_store::SequenceNumber;

use crate::error::SubscriptionStoreError;
use crate::subscription::{
    Subscription, SubscriptionCriteria, SubscriptionError, SubscriptionId, SubscriptionStatus,
    Subscriptions,
};

/// Result type for subscription store operations.
pub type Result<T> = std::result::Result<T, SubscriptionStoreError>;

/// Storage of subscription positions and statuses.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Creates the backing storage if needed.
    async fn setup(&self) -> Result<()>;

    /// Returns the subscriptions matching the criteria, ordered by id.
    async fn find(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions>;

    /// Adds a new subscription.
    async fn add(&self, subscription: Subscription) -> Result<()>;

    /// Updates status, position and error of a subscription.
    async fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()>;

    /// Records the setup hash the subscription was last set up with.
    async fn update_setup_hash(&self, id: &SubscriptionId, setup_hash: Option<String>)
    -> Result<()>;
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for Arc<T> {
    async fn setup(&self) -> Result<()> {
        (**self).setup().await
    }

    async fn find(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        (**self).find(criteria).await
    }

    async fn add(&self, subscription: Subscription) -> Result<()> {
        (**self).add(subscription).await
    }

    async fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        (**self).update(id, status, position, error).await
    }

    async fn update_setup_hash(
        &self,
        id: &SubscriptionId,
        setup_hash: Option<String>,
    ) -> Result<()> {
        (**self).update_setup_hash(id, setup_hash).await
    }
}
