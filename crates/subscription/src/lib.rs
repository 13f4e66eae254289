//! Subscription engine of the content repository.
//!
//! This crate keeps read models in step with the event log:
//! - [`Projection`] trait for read models fed event by event
//! - [`CatchUpHook`] for side effects that follow a projection's catch-up
//! - [`SubscriptionStore`] persisting each subscriber's position and status
//! - [`SubscriptionEngine`] for setup, boot, catch-up, reset and reactivation
//! - [`ContentGraphView`], the node graph of every content stream

pub mod engine;
pub mod error;
pub mod hook;
pub mod projection;
pub mod store;
pub mod subscriber;
pub mod subscription;
pub mod views;

pub use engine::{
    ErrorSource, ProcessedResult, ProcessingError, SubscriptionEngine, SubscriptionStatusReport,
};
pub use error::{
    EngineResult, ProjectionError, Result, SubscriptionEngineError, SubscriptionStoreError,
};
pub use hook::CatchUpHook;
pub use projection::{Projection, ProjectionState, ProjectionStatus, TransactionScope};
pub use store::{InMemorySubscriptionStore, PostgresSubscriptionStore, SubscriptionStore};
pub use subscriber::{Subscriber, Subscribers};
pub use subscription::{
    Subscription, SubscriptionCriteria, SubscriptionError, SubscriptionId, SubscriptionStatus,
    Subscriptions,
};
pub use views::ContentGraphView;
