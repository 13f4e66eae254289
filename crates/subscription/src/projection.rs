//! Projection contract consumed by the subscription engine.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use domain::ContentRepositoryEvent;
use event_store::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Type-erased read side of a projection, see
/// [`Subscribers::projection_state`](crate::Subscribers::projection_state).
pub type ProjectionState = Arc<dyn Any + Send + Sync>;

/// Health report of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum ProjectionStatus {
    Ok,
    SetupRequired(String),
    Error(String),
}

impl ProjectionStatus {
    pub fn is_setup_required(&self) -> bool {
        matches!(self, ProjectionStatus::SetupRequired(_))
    }
}

/// Who owns the transaction a projection writes in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionScope {
    /// The engine brackets each batch in a transaction and each event in a
    /// savepoint through the projection's transaction hooks.
    #[default]
    Engine,

    /// The projection writes through a connection the engine does not
    /// control. Positions are persisted after every event and the partial
    /// writes of a failing event are not rolled back.
    External,
}

/// A read model fed by the subscription engine.
///
/// `apply` is called exactly once per event and subscriber, in sequence
/// number order. The transaction hooks are only called for
/// [`TransactionScope::Engine`] projections:
///
/// ```text
/// begin_transaction
///   create_savepoint, apply, (rollback_to_savepoint on failure)
///   ...
/// commit_transaction
/// ```
#[async_trait]
pub trait Projection: Send + Sync {
    /// Creates or migrates the projection's storage.
    async fn set_up(&self) -> Result<()>;

    /// Drops everything the projection has built.
    async fn reset_state(&self) -> Result<()>;

    /// Applies a single event.
    async fn apply(&self, event: &ContentRepositoryEvent, envelope: &EventEnvelope) -> Result<()>;

    /// Reports whether the projection can process events.
    async fn status(&self) -> ProjectionStatus;

    /// Returns the query side of the projection.
    fn state(&self) -> ProjectionState;

    /// Fingerprint of the projection's storage layout; a change triggers
    /// `set_up` on the next engine setup.
    fn setup_hash(&self) -> Option<String> {
        None
    }

    fn transaction_scope(&self) -> TransactionScope {
        TransactionScope::Engine
    }

    async fn begin_transaction(&self) -> Result<()> {
        Ok(())
    }

    async fn create_savepoint(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback_to_savepoint(&self) -> Result<()> {
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        Ok(())
    }
}
