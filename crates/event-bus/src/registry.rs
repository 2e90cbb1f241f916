//! # Subscription Registry
//!
//! Indexes subscriptions two ways:
//!
//! - `pattern → subscriptions`, each list kept sorted by priority
//! - `id → subscription`, for O(1) lookup and removal
//!
//! A pattern key exists only while it has at least one subscription. The
//! pattern is unregistered from the [`Matcher`] in the same operation that
//! removes its last subscription, so dead patterns never accumulate.
//!
//! Lock order: registry lock, then the trie lock inside the matcher.

use crate::error::BusError;
use crate::matcher::Matcher;
use crate::subscription::Subscription;
use crate::topic::Topic;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    by_pattern: HashMap<Topic, Vec<Arc<Subscription>>>,
    by_id: HashMap<String, Arc<Subscription>>,
}

/// Thread-safe index of subscriptions by pattern and by ID.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
    matcher: Matcher,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidSubscription` if the ID is empty or already taken,
    /// or the pattern is empty.
    pub fn add(&self, subscription: Arc<Subscription>) -> Result<(), BusError> {
        if subscription.id().is_empty() {
            return Err(BusError::InvalidSubscription("empty subscription id".into()));
        }
        if subscription.pattern().is_empty() {
            return Err(BusError::InvalidSubscription("empty topic pattern".into()));
        }

        let mut inner = self.inner.write();
        if inner.by_id.contains_key(subscription.id()) {
            return Err(BusError::InvalidSubscription(format!(
                "duplicate subscription id {}",
                subscription.id()
            )));
        }

        let pattern = subscription.pattern().clone();
        let list = inner.by_pattern.entry(pattern.clone()).or_default();
        list.push(Arc::clone(&subscription));
        list.sort_by_key(|s| s.priority());

        inner
            .by_id
            .insert(subscription.id().to_string(), Arc::clone(&subscription));
        self.matcher.add(&pattern);

        debug!(
            subscription_id = %subscription.id(),
            pattern = %pattern,
            priority = subscription.priority().0,
            "Subscription registered"
        );
        Ok(())
    }

    /// Unregister a subscription by ID and return it.
    ///
    /// # Errors
    ///
    /// `BusError::SubscriptionNotFound` if no such ID is registered.
    pub fn remove(&self, id: &str) -> Result<Arc<Subscription>, BusError> {
        let mut inner = self.inner.write();
        let subscription = inner
            .by_id
            .remove(id)
            .ok_or_else(|| BusError::SubscriptionNotFound(id.to_string()))?;

        Self::detach(&mut inner, &self.matcher, &subscription);

        debug!(subscription_id = %id, pattern = %subscription.pattern(), "Subscription removed");
        Ok(subscription)
    }

    /// Purge every cancelled subscription. Returns how many were removed.
    pub fn remove_cancelled(&self) -> usize {
        let mut inner = self.inner.write();
        let cancelled: Vec<Arc<Subscription>> = inner
            .by_id
            .values()
            .filter(|s| s.is_cancelled())
            .cloned()
            .collect();

        for subscription in &cancelled {
            inner.by_id.remove(subscription.id());
            Self::detach(&mut inner, &self.matcher, subscription);
        }

        if !cancelled.is_empty() {
            debug!(removed = cancelled.len(), "Cancelled subscriptions purged");
        }
        cancelled.len()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Subscription>> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Every subscription matching `topic`, sorted by priority across all
    /// matching patterns.
    #[must_use]
    pub fn match_topic(&self, topic: &Topic) -> Vec<Arc<Subscription>> {
        let inner = self.inner.read();
        let mut matched: Vec<Arc<Subscription>> = self
            .matcher
            .matches(topic)
            .iter()
            .filter_map(|pattern| inner.by_pattern.get(pattern))
            .flatten()
            .cloned()
            .collect();
        drop(inner);

        matched.sort_by_key(|s| s.priority());
        matched
    }

    /// Like [`Registry::match_topic`], restricted to active subscriptions.
    #[must_use]
    pub fn match_active(&self, topic: &Topic) -> Vec<Arc<Subscription>> {
        let mut matched = self.match_topic(topic);
        matched.retain(|s| s.is_active());
        matched
    }

    /// Subscriptions registered under exactly this pattern.
    #[must_use]
    pub fn by_pattern(&self, pattern: &Topic) -> Vec<Arc<Subscription>> {
        self.inner
            .read()
            .by_pattern
            .get(pattern)
            .cloned()
            .unwrap_or_default()
    }

    /// Registered patterns.
    #[must_use]
    pub fn patterns(&self) -> Vec<Topic> {
        self.inner.read().by_pattern.keys().cloned().collect()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<Subscription>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscription and pattern.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_pattern.clear();
        inner.by_id.clear();
        self.matcher.clear();
    }

    fn detach(inner: &mut RegistryInner, matcher: &Matcher, subscription: &Arc<Subscription>) {
        let pattern = subscription.pattern();
        let Some(list) = inner.by_pattern.get_mut(pattern) else {
            return;
        };

        list.retain(|s| !Arc::ptr_eq(s, subscription));
        if list.is_empty() {
            inner.by_pattern.remove(pattern);
            matcher.remove(pattern);
        }
    }
}
