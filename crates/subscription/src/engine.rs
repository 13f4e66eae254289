//! Subscription engine driving every configured projection off the log.

use std::time::Instant;

use domain::ContentRepositoryEvent;
use event_store::{EventEnvelope, EventStore, SequenceNumber};
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::{EngineResult, ProjectionError, SubscriptionEngineError};
use crate::projection::{ProjectionStatus, TransactionScope};
use crate::store::SubscriptionStore;
use crate::subscriber::{Subscriber, Subscribers};
use crate::subscription::{
    Subscription, SubscriptionCriteria, SubscriptionError, SubscriptionId, SubscriptionStatus,
};

/// Step of the engine in which a subscriber failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorSource {
    SetUp,
    ResetState,
    BeginTransaction,
    Savepoint,
    Apply,
    CommitTransaction,
    CatchUpHook,
}

/// A failure of one subscriber during an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingError {
    pub subscription_id: SubscriptionId,
    pub message: String,
    pub source: ErrorSource,
}

impl ProcessingError {
    fn new(subscription_id: &SubscriptionId, error: &ProjectionError, source: ErrorSource) -> Self {
        Self {
            subscription_id: subscription_id.clone(),
            message: error.to_string(),
            source,
        }
    }
}

/// Outcome of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedResult {
    /// Number of distinct log events delivered to at least one subscriber.
    pub number_of_processed_events: u64,

    pub errors: Option<Vec<ProcessingError>>,
}

impl ProcessedResult {
    /// A result without errors.
    pub fn success(number_of_processed_events: u64) -> Self {
        Self {
            number_of_processed_events,
            errors: None,
        }
    }

    /// A result carrying the given errors, if any.
    pub fn with_errors(number_of_processed_events: u64, errors: Vec<ProcessingError>) -> Self {
        Self {
            number_of_processed_events,
            errors: (!errors.is_empty()).then_some(errors),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.errors.is_some()
    }

    pub fn errors(&self) -> &[ProcessingError] {
        self.errors.as_deref().unwrap_or_default()
    }
}

/// Merged view of a subscription and its projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionStatusReport {
    pub id: SubscriptionId,
    pub status: SubscriptionStatus,
    pub position: SequenceNumber,
    pub error: Option<SubscriptionError>,

    /// `None` for detached subscriptions, whose projection is unknown.
    pub projection_status: Option<ProjectionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatchUpMode {
    Boot,
    Active,
    Reactivate,
}

impl CatchUpMode {
    fn as_str(&self) -> &'static str {
        match self {
            CatchUpMode::Boot => "boot",
            CatchUpMode::Active => "catch_up_active",
            CatchUpMode::Reactivate => "reactivate",
        }
    }

    fn statuses(&self) -> &'static [SubscriptionStatus] {
        match self {
            CatchUpMode::Boot => &[SubscriptionStatus::New, SubscriptionStatus::Booting],
            CatchUpMode::Active => &[SubscriptionStatus::Active],
            CatchUpMode::Reactivate => &[SubscriptionStatus::Error],
        }
    }
}

/// Progress of one subscriber through a catch-up run.
struct CatchUpRun<'a> {
    subscriber: &'a Subscriber,
    status: SubscriptionStatus,
    error: Option<SubscriptionError>,
    position: SequenceNumber,
    persisted_position: SequenceNumber,
    failed: bool,
}

impl<'a> CatchUpRun<'a> {
    fn new(subscriber: &'a Subscriber, subscription: Subscription) -> Self {
        Self {
            subscriber,
            status: subscription.status,
            error: subscription.error,
            position: subscription.position,
            persisted_position: subscription.position,
            failed: false,
        }
    }

    fn id(&self) -> &SubscriptionId {
        &self.subscriber.id
    }

    fn engine_scoped(&self) -> bool {
        self.subscriber.projection.transaction_scope() == TransactionScope::Engine
    }

    fn needs(&self, envelope: &EventEnvelope) -> bool {
        !self.failed && self.position < envelope.sequence_number
    }

    async fn apply(
        &self,
        event: &ContentRepositoryEvent,
        envelope: &EventEnvelope,
    ) -> Result<(), ProjectionError> {
        if let Some(hook) = &self.subscriber.catch_up_hook {
            hook.on_before_event(event, envelope).await?;
        }
        self.subscriber.projection.apply(event, envelope).await?;
        if let Some(hook) = &self.subscriber.catch_up_hook {
            hook.on_after_event(event, envelope).await?;
        }
        Ok(())
    }
}

/// Drives the configured subscribers through setup, boot and catch-up.
///
/// Every operation is idempotent with respect to the persisted positions: a
/// subscriber never sees an event twice, and a failing subscriber keeps the
/// position of the last event it applied.
pub struct SubscriptionEngine<S: EventStore, T: SubscriptionStore> {
    event_store: S,
    subscription_store: T,
    subscribers: Subscribers,
}

impl<S: EventStore, T: SubscriptionStore> SubscriptionEngine<S, T> {
    /// Creates an engine for the given subscribers.
    pub fn new(event_store: S, subscription_store: T, subscribers: Subscribers) -> Self {
        Self {
            event_store,
            subscription_store,
            subscribers,
        }
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    pub fn subscription_store(&self) -> &T {
        &self.subscription_store
    }

    /// Registers new subscribers, detaches removed ones and sets up the
    /// projections that need it.
    ///
    /// New subscriptions move to `Active` right away when the log is empty,
    /// otherwise to `Booting`.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self, criteria: &SubscriptionCriteria) -> EngineResult<ProcessedResult> {
        self.subscription_store.setup().await?;

        let mut errors = Vec::new();
        self.discover_subscriptions(criteria, &mut errors).await?;

        let head = self.event_store.head().await?;
        let subscriptions = self.subscription_store.find(criteria).await?;

        for subscription in subscriptions {
            if subscription.status == SubscriptionStatus::Detached {
                continue;
            }
            let Some(subscriber) = self.subscribers.get(&subscription.id) else {
                continue;
            };

            let projection = &subscriber.projection;
            let setup_hash = projection.setup_hash();
            if projection.status().await.is_setup_required() || setup_hash != subscription.setup_hash
            {
                tracing::info!(subscription = %subscription.id, "setting up projection");
                if let Err(error) = projection.set_up().await {
                    self.record_failure(&subscription, &error, ErrorSource::SetUp, &mut errors)
                        .await?;
                    continue;
                }
                self.subscription_store
                    .update_setup_hash(&subscription.id, setup_hash)
                    .await?;
            }

            if subscription.status == SubscriptionStatus::New {
                let status = if head.is_none() {
                    SubscriptionStatus::Active
                } else {
                    SubscriptionStatus::Booting
                };
                self.subscription_store
                    .update(&subscription.id, status, SequenceNumber::none(), None)
                    .await?;
            }
        }

        Ok(ProcessedResult::with_errors(0, errors))
    }

    /// Catches up `New` and `Booting` subscriptions and activates them.
    #[tracing::instrument(skip(self))]
    pub async fn boot(
        &self,
        criteria: &SubscriptionCriteria,
        batch_size: Option<usize>,
    ) -> EngineResult<ProcessedResult> {
        self.catch_up(criteria, CatchUpMode::Boot, batch_size).await
    }

    /// Catches up `Active` subscriptions.
    #[tracing::instrument(skip(self))]
    pub async fn catch_up_active(
        &self,
        criteria: &SubscriptionCriteria,
        batch_size: Option<usize>,
    ) -> EngineResult<ProcessedResult> {
        self.catch_up(criteria, CatchUpMode::Active, batch_size).await
    }

    /// Catches up `Error` subscriptions, activating the ones that succeed.
    #[tracing::instrument(skip(self))]
    pub async fn reactivate(
        &self,
        criteria: &SubscriptionCriteria,
        batch_size: Option<usize>,
    ) -> EngineResult<ProcessedResult> {
        self.catch_up(criteria, CatchUpMode::Reactivate, batch_size).await
    }

    /// Resets the projections of all subscriptions except `New` and
    /// `Detached` ones and moves them back to `Booting`.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self, criteria: &SubscriptionCriteria) -> EngineResult<ProcessedResult> {
        let subscriptions = self.subscription_store.find(criteria).await?;
        let mut errors = Vec::new();

        for subscription in subscriptions.iter().filter(|subscription| {
            !matches!(
                subscription.status,
                SubscriptionStatus::New | SubscriptionStatus::Detached
            )
        }) {
            let Some(subscriber) = self.subscribers.get(&subscription.id) else {
                continue;
            };
            match subscriber.projection.reset_state().await {
                Ok(()) => {
                    self.subscription_store
                        .update(
                            &subscription.id,
                            SubscriptionStatus::Booting,
                            SequenceNumber::none(),
                            None,
                        )
                        .await?;
                    tracing::info!(subscription = %subscription.id, "subscription reset");
                }
                Err(error) => {
                    tracing::warn!(subscription = %subscription.id, %error, "reset failed");
                    errors.push(ProcessingError::new(
                        &subscription.id,
                        &error,
                        ErrorSource::ResetState,
                    ));
                }
            }
        }

        Ok(ProcessedResult::with_errors(0, errors))
    }

    /// Returns the status of every configured subscriber, persisted or not,
    /// plus every persisted subscription whose subscriber is gone.
    pub async fn subscription_statuses(
        &self,
        criteria: &SubscriptionCriteria,
    ) -> EngineResult<Vec<SubscriptionStatusReport>> {
        let by_id = SubscriptionCriteria {
            ids: criteria.ids.clone(),
            statuses: None,
        };
        let persisted = self.subscription_store.find(&by_id).await?;

        let mut reports = Vec::new();
        for subscriber in self
            .subscribers
            .iter()
            .filter(|subscriber| criteria.matches_id(&subscriber.id))
        {
            let projection_status = Some(subscriber.projection.status().await);
            let report = match persisted.get(&subscriber.id) {
                Some(subscription) => SubscriptionStatusReport {
                    id: subscription.id.clone(),
                    status: subscription.status,
                    position: subscription.position,
                    error: subscription.error.clone(),
                    projection_status,
                },
                None => SubscriptionStatusReport {
                    id: subscriber.id.clone(),
                    status: SubscriptionStatus::New,
                    position: SequenceNumber::none(),
                    error: None,
                    projection_status,
                },
            };
            reports.push(report);
        }

        for subscription in persisted
            .iter()
            .filter(|subscription| !self.subscribers.contains(&subscription.id))
        {
            reports.push(SubscriptionStatusReport {
                id: subscription.id.clone(),
                status: SubscriptionStatus::Detached,
                position: subscription.position,
                error: subscription.error.clone(),
                projection_status: None,
            });
        }

        reports.retain(|report| {
            criteria
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&report.status))
        });
        reports.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(reports)
    }

    /// Adds configured subscribers that are not persisted yet and detaches
    /// persisted subscriptions that are no longer configured.
    async fn discover_subscriptions(
        &self,
        criteria: &SubscriptionCriteria,
        errors: &mut Vec<ProcessingError>,
    ) -> EngineResult<()> {
        let by_id = SubscriptionCriteria {
            ids: criteria.ids.clone(),
            statuses: None,
        };
        let persisted = self.subscription_store.find(&by_id).await?;

        for subscriber in self
            .subscribers
            .iter()
            .filter(|subscriber| criteria.matches_id(&subscriber.id))
        {
            match persisted.get(&subscriber.id) {
                None => {
                    tracing::info!(subscription = %subscriber.id, "new subscription");
                    self.subscription_store
                        .add(Subscription::new(subscriber.id.clone()))
                        .await?;
                }
                Some(subscription) if subscription.status == SubscriptionStatus::Detached => {
                    tracing::info!(subscription = %subscriber.id, "detached subscription is configured again");
                    if let Err(error) = subscriber.projection.reset_state().await {
                        self.record_failure(subscription, &error, ErrorSource::ResetState, errors)
                            .await?;
                        continue;
                    }
                    self.subscription_store
                        .update(
                            &subscriber.id,
                            SubscriptionStatus::New,
                            SequenceNumber::none(),
                            None,
                        )
                        .await?;
                }
                Some(_) => {}
            }
        }

        for subscription in persisted.iter().filter(|subscription| {
            subscription.status != SubscriptionStatus::Detached
                && !self.subscribers.contains(&subscription.id)
        }) {
            self.detach(subscription).await?;
        }

        Ok(())
    }

    async fn detach(&self, subscription: &Subscription) -> EngineResult<()> {
        tracing::info!(subscription = %subscription.id, "subscriber no longer configured, detaching");
        self.subscription_store
            .update(
                &subscription.id,
                SubscriptionStatus::Detached,
                subscription.position,
                subscription.error.clone(),
            )
            .await?;
        Ok(())
    }

    /// Moves a subscription to `Error` outside of a catch-up run.
    async fn record_failure(
        &self,
        subscription: &Subscription,
        error: &ProjectionError,
        source: ErrorSource,
        errors: &mut Vec<ProcessingError>,
    ) -> EngineResult<()> {
        tracing::warn!(subscription = %subscription.id, %error, ?source, "subscription failed");
        metrics::counter!("subscription_errors_total", "subscription" => subscription.id.to_string())
            .increment(1);
        self.subscription_store
            .update(
                &subscription.id,
                SubscriptionStatus::Error,
                subscription.position,
                Some(SubscriptionError::from_error(subscription.status, error)),
            )
            .await?;
        errors.push(ProcessingError::new(&subscription.id, error, source));
        Ok(())
    }

    async fn catch_up(
        &self,
        criteria: &SubscriptionCriteria,
        mode: CatchUpMode,
        batch_size: Option<usize>,
    ) -> EngineResult<ProcessedResult> {
        if batch_size == Some(0) {
            return Err(SubscriptionEngineError::InvalidBatchSize(0));
        }

        let started = Instant::now();
        let criteria = criteria.clone().with_statuses(mode.statuses());
        let subscriptions = self.subscription_store.find(&criteria).await?;

        let mut runs = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            match self.subscribers.get(&subscription.id) {
                Some(subscriber) => runs.push(CatchUpRun::new(subscriber, subscription)),
                None => self.detach(&subscription).await?,
            }
        }

        let Some(low_water_mark) = runs.iter().map(|run| run.position).min() else {
            return Ok(ProcessedResult::success(0));
        };

        if mode == CatchUpMode::Active && self.event_store.head().await? <= low_water_mark {
            tracing::debug!("no new events");
            return Ok(ProcessedResult::success(0));
        }

        let mut errors = Vec::new();
        for run in &runs {
            if let Some(hook) = &run.subscriber.catch_up_hook
                && let Err(error) = hook.on_before_catch_up(run.status).await
            {
                tracing::warn!(subscription = %run.id(), %error, "on_before_catch_up failed");
                errors.push(ProcessingError::new(run.id(), &error, ErrorSource::CatchUpHook));
            }
        }

        let mut processed = 0;
        let mut stream = self.event_store.stream_all(low_water_mark.next()).await?;
        let mut batch = Vec::new();
        while let Some(envelope) = stream.next().await {
            batch.push(envelope?);
            if batch_size.is_some_and(|size| batch.len() >= size) {
                processed += self.process_batch(&mut runs, &batch, &mut errors).await?;
                batch.clear();
                if runs.iter().all(|run| run.failed) {
                    break;
                }
            }
        }
        if !batch.is_empty() {
            processed += self.process_batch(&mut runs, &batch, &mut errors).await?;
        }

        for run in &runs {
            if let Some(hook) = &run.subscriber.catch_up_hook
                && let Err(error) = hook.on_after_catch_up().await
            {
                tracing::warn!(subscription = %run.id(), %error, "on_after_catch_up failed");
                errors.push(ProcessingError::new(run.id(), &error, ErrorSource::CatchUpHook));
            }
        }

        for run in runs.iter().filter(|run| !run.failed) {
            if run.status != SubscriptionStatus::Active
                || run.error.is_some()
                || run.position != run.persisted_position
            {
                self.subscription_store
                    .update(run.id(), SubscriptionStatus::Active, run.position, None)
                    .await?;
            }
        }

        metrics::histogram!("subscription_catch_up_duration_seconds", "mode" => mode.as_str())
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            mode = mode.as_str(),
            subscriptions = runs.len(),
            events_processed = processed,
            failed = errors.len(),
            "catch-up complete"
        );

        Ok(ProcessedResult::with_errors(processed, errors))
    }

    /// Delivers one batch to every subscriber that still needs it.
    ///
    /// Returns the number of events delivered to at least one subscriber.
    async fn process_batch(
        &self,
        runs: &mut [CatchUpRun<'_>],
        batch: &[EventEnvelope],
        errors: &mut Vec<ProcessingError>,
    ) -> EngineResult<u64> {
        for run in runs
            .iter_mut()
            .filter(|run| !run.failed && run.engine_scoped())
        {
            if let Err(error) = run.subscriber.projection.begin_transaction().await {
                self.fail(run, error, ErrorSource::BeginTransaction, errors)
                    .await?;
            }
        }

        let mut processed = 0;
        for envelope in batch {
            let event = ContentRepositoryEvent::from_envelope(envelope);
            let mut delivered = false;

            for run in runs.iter_mut().filter(|run| run.needs(envelope)) {
                delivered = true;

                if run.engine_scoped()
                    && let Err(error) = run.subscriber.projection.create_savepoint().await
                {
                    self.fail(run, error, ErrorSource::Savepoint, errors).await?;
                    continue;
                }

                let outcome = match &event {
                    Ok(event) => run.apply(event, envelope).await,
                    Err(error) => Err(ProjectionError::new(format!(
                        "cannot decode event {} of type {}: {error}",
                        envelope.sequence_number, envelope.event_type
                    ))),
                };

                match outcome {
                    Ok(()) => {
                        run.position = envelope.sequence_number;
                        metrics::counter!("subscription_events_applied_total", "subscription" => run.id().to_string())
                            .increment(1);
                        if !run.engine_scoped() {
                            self.persist_position(run).await?;
                        }
                    }
                    Err(error) => self.fail(run, error, ErrorSource::Apply, errors).await?,
                }
            }

            if delivered {
                processed += 1;
            }
        }

        for run in runs.iter_mut().filter(|run| !run.failed) {
            if run.engine_scoped()
                && let Err(error) = run.subscriber.projection.commit_transaction().await
            {
                self.fail(run, error, ErrorSource::CommitTransaction, errors)
                    .await?;
                continue;
            }
            self.persist_position(run).await?;
        }

        Ok(processed)
    }

    async fn persist_position(&self, run: &mut CatchUpRun<'_>) -> EngineResult<()> {
        if run.position == run.persisted_position {
            return Ok(());
        }
        self.subscription_store
            .update(run.id(), run.status, run.position, run.error.clone())
            .await?;
        run.persisted_position = run.position;
        Ok(())
    }

    /// Takes a subscriber out of the run and records its error.
    ///
    /// Whatever the subscriber applied before the failing event is committed
    /// and its position persisted.
    async fn fail(
        &self,
        run: &mut CatchUpRun<'_>,
        error: ProjectionError,
        source: ErrorSource,
        errors: &mut Vec<ProcessingError>,
    ) -> EngineResult<()> {
        let projection = &run.subscriber.projection;
        if run.engine_scoped() {
            if source == ErrorSource::Apply
                && let Err(rollback_error) = projection.rollback_to_savepoint().await
            {
                tracing::error!(subscription = %run.subscriber.id, error = %rollback_error, "rollback to savepoint failed");
            }
            if matches!(source, ErrorSource::Apply | ErrorSource::Savepoint)
                && let Err(commit_error) = projection.commit_transaction().await
            {
                tracing::error!(subscription = %run.subscriber.id, error = %commit_error, "commit after failure failed");
                run.position = run.persisted_position;
            }
        }
        if source == ErrorSource::CommitTransaction {
            run.position = run.persisted_position;
        }

        tracing::warn!(
            subscription = %run.subscriber.id,
            position = %run.position,
            %error,
            ?source,
            "subscriber failed"
        );
        metrics::counter!("subscription_errors_total", "subscription" => run.subscriber.id.to_string())
            .increment(1);

        let previous_status = match (&run.status, &run.error) {
            (SubscriptionStatus::Error, Some(previous)) => previous.previous_status,
            (status, _) => *status,
        };
        self.subscription_store
            .update(
                &run.subscriber.id,
                SubscriptionStatus::Error,
                run.position,
                Some(SubscriptionError::from_error(previous_status, &error)),
            )
            .await?;

        run.persisted_position = run.position;
        run.failed = true;
        errors.push(ProcessingError::new(&run.subscriber.id, &error, source));
        Ok(())
    }
}
