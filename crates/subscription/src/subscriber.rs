//! Configured consumers of the event log.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::hook::CatchUpHook;
use crate::projection::Projection;
use crate::subscription::SubscriptionId;

/// A projection registered with the engine under a subscription id.
#[derive(Clone)]
pub struct Subscriber {
    pub id: SubscriptionId,
    pub projection: Arc<dyn Projection>,
    pub catch_up_hook: Option<Arc<dyn CatchUpHook>>,
}

impl Subscriber {
    /// Creates a subscriber without catch-up hook.
    pub fn new(id: impl Into<SubscriptionId>, projection: Arc<dyn Projection>) -> Self {
        Self {
            id: id.into(),
            projection,
            catch_up_hook: None,
        }
    }

    /// Attaches a catch-up hook.
    pub fn with_catch_up_hook(mut self, hook: Arc<dyn CatchUpHook>) -> Self {
        self.catch_up_hook = Some(hook);
        self
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("catch_up_hook", &self.catch_up_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// The set of subscribers an engine is configured with, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct Subscribers {
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber, replacing one with the same id.
    pub fn register(&mut self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.id.clone(), subscriber);
    }

    pub fn get(&self, id: &SubscriptionId) -> Option<&Subscriber> {
        self.subscribers.get(id)
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.subscribers.contains_key(id)
    }

    /// Iterates over the subscribers ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Returns the state of the first projection whose state is a `T`.
    pub fn projection_state<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.subscribers
            .values()
            .find_map(|subscriber| subscriber.projection.state().downcast::<T>().ok())
    }
}

impl FromIterator<Subscriber> for Subscribers {
    fn from_iter<I: IntoIterator<Item = Subscriber>>(iter: I) -> Self {
        let mut subscribers = Self::new();
        for subscriber in iter {
            subscribers.register(subscriber);
        }
        subscribers
    }
}
