//! Persisted subscription state.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use event_store::SequenceNumber;
use serde::{Deserialize, Serialize};

use crate::error::SubscriptionStoreError;

/// Identifier of a subscription, e.g. `contentGraph`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Creates a subscription id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a subscription.
///
/// ```text
/// New --setup--> Booting --boot--> Active --(apply fails)--> Error
/// Error --reactivate--> Active
/// Error --reset--> Booting
/// any --(subscriber no longer configured)--> Detached
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    New,
    Booting,
    Active,
    Error,
    Detached,
}

impl SubscriptionStatus {
    /// Returns the persisted representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::New => "NEW",
            SubscriptionStatus::Booting => "BOOTING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Error => "ERROR",
            SubscriptionStatus::Detached => "DETACHED",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = SubscriptionStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(SubscriptionStatus::New),
            "BOOTING" => Ok(SubscriptionStatus::Booting),
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "ERROR" => Ok(SubscriptionStatus::Error),
            "DETACHED" => Ok(SubscriptionStatus::Detached),
            other => Err(SubscriptionStoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// Error recorded on a subscription whose projection failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionError {
    /// Status the subscription had before it failed.
    pub previous_status: SubscriptionStatus,

    /// Message of the original error.
    pub error_message: String,

    /// Chain of underlying causes, if any.
    pub error_trace: Option<String>,
}

impl SubscriptionError {
    /// Creates an error record from any error, keeping its source chain.
    pub fn from_error(
        previous_status: SubscriptionStatus,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            previous_status,
            error_message: error.to_string(),
            error_trace: (!causes.is_empty()).then(|| causes.join("\n")),
        }
    }
}

/// A persisted subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub status: SubscriptionStatus,

    /// Sequence number of the last event applied by the subscriber.
    pub position: SequenceNumber,

    pub error: Option<SubscriptionError>,

    /// Setup hash of the projection when it was last set up.
    pub setup_hash: Option<String>,

    pub last_saved_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Creates a subscription that has seen nothing yet.
    pub fn new(id: SubscriptionId) -> Self {
        Self {
            id,
            status: SubscriptionStatus::New,
            position: SequenceNumber::none(),
            error: None,
            setup_hash: None,
            last_saved_at: None,
        }
    }
}

/// A set of subscriptions, ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscriptions(Vec<Subscription>);

impl Subscriptions {
    /// Creates a set from a list, sorting it by id.
    pub fn new(mut subscriptions: Vec<Subscription>) -> Self {
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        Self(subscriptions)
    }

    /// Returns the subscription with the given id.
    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscription> {
        self.0.iter().find(|subscription| &subscription.id == id)
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowest position of all subscriptions, `None` for an empty set.
    pub fn lowest_position(&self) -> Option<SequenceNumber> {
        self.0.iter().map(|subscription| subscription.position).min()
    }
}

impl IntoIterator for Subscriptions {
    type Item = Subscription;
    type IntoIter = std::vec::IntoIter<Subscription>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Filter for subscription lookups. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionCriteria {
    pub ids: Option<HashSet<SubscriptionId>>,
    pub statuses: Option<HashSet<SubscriptionStatus>>,
}

impl SubscriptionCriteria {
    /// Matches every subscription.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches the given ids only.
    pub fn for_ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<SubscriptionId>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            statuses: None,
        }
    }

    /// Restricts the criteria to the given statuses.
    pub fn with_statuses(mut self, statuses: &[SubscriptionStatus]) -> Self {
        self.statuses = Some(statuses.iter().copied().collect());
        self
    }

    /// Returns true if the subscription id matches.
    pub fn matches_id(&self, id: &SubscriptionId) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(id))
    }

    /// Returns true if the subscription matches.
    pub fn matches(&self, subscription: &Subscription) -> bool {
        self.matches_id(&subscription.id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&subscription.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_persisted_form() {
        for status in [
            SubscriptionStatus::New,
            SubscriptionStatus::Booting,
            SubscriptionStatus::Active,
            SubscriptionStatus::Error,
            SubscriptionStatus::Detached,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn criteria_match_ids_and_statuses() {
        let mut active = Subscription::new(SubscriptionId::new("a"));
        active.status = SubscriptionStatus::Active;
        let other = Subscription::new(SubscriptionId::new("b"));

        let criteria = SubscriptionCriteria::for_ids(["a"]);
        assert!(criteria.matches(&active));
        assert!(!criteria.matches(&other));

        let criteria = SubscriptionCriteria::all().with_statuses(&[SubscriptionStatus::New]);
        assert!(!criteria.matches(&active));
        assert!(criteria.matches(&other));
    }

    #[test]
    fn lowest_position_of_set() {
        let mut a = Subscription::new(SubscriptionId::new("a"));
        a.position = SequenceNumber::new(7);
        let mut b = Subscription::new(SubscriptionId::new("b"));
        b.position = SequenceNumber::new(3);

        let subscriptions = Subscriptions::new(vec![a, b]);
        assert_eq!(subscriptions.lowest_position(), Some(SequenceNumber::new(3)));
        assert_eq!(subscriptions.iter().next().unwrap().id.as_str(), "a");
        assert_eq!(Subscriptions::default().lowest_position(), None);
    }

    #[test]
    fn error_record_keeps_the_source_chain() {
        let inner = std::io::Error::other("disk full");
        let outer = crate::error::ProjectionError::Database(sqlx::Error::Io(inner));

        let error = SubscriptionError::from_error(SubscriptionStatus::Active, &outer);
        assert_eq!(error.previous_status, SubscriptionStatus::Active);
        assert!(error.error_message.contains("disk full"));
    }
}
