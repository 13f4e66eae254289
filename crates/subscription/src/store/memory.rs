use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use event_store::SequenceNumber;
use tokio::sync::RwLock;

use super::{Result, SubscriptionStore};
use crate::error::SubscriptionStoreError;
use crate::subscription::{
    Subscription, SubscriptionCriteria, SubscriptionError, SubscriptionId, SubscriptionStatus,
    Subscriptions,
};

/// In-memory subscription store, for tests and single-process setups.
#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
}

impl InMemorySubscriptionStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn find(&self, criteria: &SubscriptionCriteria) -> Result<Subscriptions> {
        let subscriptions = self.subscriptions.read().await;
        Ok(Subscriptions::new(
            subscriptions
                .values()
                .filter(|subscription| criteria.matches(subscription))
                .cloned()
                .collect(),
        ))
    }

    async fn add(&self, mut subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&subscription.id) {
            return Err(SubscriptionStoreError::AlreadyExists(subscription.id));
        }
        subscription.last_saved_at = Some(Utc::now());
        subscriptions.insert(subscription.id.clone(), subscription);
        Ok(())
    }

    async fn update(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
        position: SequenceNumber,
        error: Option<SubscriptionError>,
    ) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| SubscriptionStoreError::NotFound(id.clone()))?;
        subscription.status = status;
        subscription.position = position;
        subscription.error = error;
        subscription.last_saved_at = Some(Utc::now());
        Ok(())
    }

    async fn update_setup_hash(
        &self,
        id: &SubscriptionId,
        setup_hash: Option<String>,
    ) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| SubscriptionStoreError::NotFound(id.clone()))?;
        subscription.setup_hash = setup_hash;
        subscription.last_saved_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_find_and_update() {
        let store = InMemorySubscriptionStore::new();
        store
            .add(Subscription::new(SubscriptionId::new("graph")))
            .await
            .unwrap();

        store
            .update(
                &SubscriptionId::new("graph"),
                SubscriptionStatus::Active,
                SequenceNumber::new(5),
                None,
            )
            .await
            .unwrap();

        let found = store.find(&SubscriptionCriteria::all()).await.unwrap();
        let subscription = found.get(&SubscriptionId::new("graph")).unwrap();
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.position, SequenceNumber::new(5));
        assert!(subscription.last_saved_at.is_some());
    }

    #[tokio::test]
    async fn adding_twice_is_rejected() {
        let store = InMemorySubscriptionStore::new();
        store.add(Subscription::new("a".into())).await.unwrap();

        let result = store.add(Subscription::new("a".into())).await;
        assert!(matches!(result, Err(SubscriptionStoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn updating_unknown_subscription_fails() {
        let store = InMemorySubscriptionStore::new();

        let result = store
            .update(
                &SubscriptionId::new("missing"),
                SubscriptionStatus::Active,
                SequenceNumber::none(),
                None,
            )
            .await;
        assert!(matches!(result, Err(SubscriptionStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_filters_by_status() {
        let store = InMemorySubscriptionStore::new();
        store.add(Subscription::new("a".into())).await.unwrap();
        store.add(Subscription::new("b".into())).await.unwrap();
        store
            .update(
                &"b".into(),
                SubscriptionStatus::Booting,
                SequenceNumber::none(),
                None,
            )
            .await
            .unwrap();

        let booting = store
            .find(&SubscriptionCriteria::all().with_statuses(&[SubscriptionStatus::Booting]))
            .await
            .unwrap();
        assert_eq!(booting.len(), 1);
        assert!(booting.contains(&"b".into()));
    }
}
