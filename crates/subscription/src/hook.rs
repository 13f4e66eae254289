//! Observers invoked around a catch-up run.

use async_trait::async_trait;
use domain::ContentRepositoryEvent;
use event_store::EventEnvelope;

use crate::Result;
use crate::subscription::SubscriptionStatus;

/// Side effects that follow a projection through a catch-up run.
///
/// The run-level hooks are called once per run and subscriber, even when
/// there is nothing to catch up. The event hooks run inside the projection's
/// savepoint; an error fails the subscriber exactly like a failing `apply`.
#[async_trait]
pub trait CatchUpHook: Send + Sync {
    async fn on_before_catch_up(&self, status: SubscriptionStatus) -> Result<()>;

    async fn on_before_event(
        &self,
        event: &ContentRepositoryEvent,
        envelope: &EventEnvelope,
    ) -> Result<()>;

    async fn on_after_event(
        &self,
        event: &ContentRepositoryEvent,
        envelope: &EventEnvelope,
    ) -> Result<()>;

    async fn on_after_catch_up(&self) -> Result<()>;
}
