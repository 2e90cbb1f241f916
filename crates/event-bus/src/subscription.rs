//! # Subscriptions
//!
//! A subscription is one consumer's registration: a topic pattern, a handler
//! and its delivery configuration. It is shared between the registry (for
//! matching) and the caller (to pause, resume or cancel it).
//!
//! ## Lifecycle
//!
//! ```text
//!            pause()             cancel()
//!   Active ──────────► Paused ──────────► Cancelled (terminal)
//!     ▲                  │
//!     └──────────────────┘
//!           resume()
//! ```
//!
//! `cancel()` is valid from any state and irreversible. Cancelling does not
//! remove the subscription from the registry; `Registry::remove_cancelled`
//! (or an explicit unsubscribe) does.

use crate::context::Context;
use crate::error::BusError;
use crate::event::Event;
use crate::topic::Topic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

// =============================================================================
// HANDLERS
// =============================================================================

/// Consumer of events.
///
/// Errors are reported to stats and the error callback; they never fail the
/// publish call and never stop sibling handlers. Panics are caught per call.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<()>;
}

/// Handler shared between the registry, the caller and in-flight tasks.
pub type SharedHandler = Arc<dyn Handler>;

/// Predicate deciding whether a subscription sees an event.
pub type Filter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context, Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: Context, event: Event) -> anyhow::Result<()> {
        (self.0)(ctx, event).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Execution priority. Lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(100);
    pub const NORMAL: Self = Self(200);
    pub const LOW: Self = Self(300);

    /// The named band this value falls into (upper bounds are inclusive).
    #[must_use]
    pub fn band(self) -> PriorityBand {
        match self.0 {
            p if p <= Self::CRITICAL.0 => PriorityBand::Critical,
            p if p <= Self::HIGH.0 => PriorityBand::High,
            p if p <= Self::NORMAL.0 => PriorityBand::Normal,
            _ => PriorityBand::Low,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Named priority ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityBand {
    Critical,
    High,
    Normal,
    Low,
}

/// How a subscription wants to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Inline, in the publisher's task, in priority order.
    #[default]
    Sync,
    /// Through the async worker pool.
    Async,
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SubscriptionState {
    Active = 0,
    Paused = 1,
    Cancelled = 2,
}

impl SubscriptionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Paused,
            _ => Self::Cancelled,
        }
    }
}

/// Per-subscription options. Defaults: random ID, normal priority, sync
/// delivery, no filter, not one-shot.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub id: Option<String>,
    pub priority: Priority,
    pub mode: DeliveryMode,
    pub filter: Option<Filter>,
    pub once: bool,
}

impl SubscribeOptions {
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Deliver successfully at most once, then unsubscribe.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("filter", &self.filter.is_some())
            .field("once", &self.once)
            .finish()
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// A registered consumer with its own lifecycle state.
pub struct Subscription {
    id: String,
    pattern: Topic,
    handler: SharedHandler,
    priority: Priority,
    mode: DeliveryMode,
    filter: Option<Filter>,
    once: bool,
    state: AtomicU8,
    /// Set while a one-shot delivery is in flight.
    once_claimed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Subscription {
    /// Create a subscription.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidTopic` if the pattern is empty or malformed.
    pub fn new(
        pattern: impl Into<Topic>,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<Self, BusError> {
        let pattern = pattern.into();
        pattern.validate()?;

        Ok(Self {
            id: options.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            pattern,
            handler,
            priority: options.priority,
            mode: options.mode,
            filter: options.filter,
            once: options.once,
            state: AtomicU8::new(SubscriptionState::Active as u8),
            once_claimed: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }

    /// Start building a subscription for `pattern`.
    pub fn builder(pattern: impl Into<Topic>) -> SubscriptionBuilder {
        SubscriptionBuilder {
            pattern: pattern.into(),
            handler: None,
            options: SubscribeOptions::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn pattern(&self) -> &Topic {
        &self.pattern
    }

    #[must_use]
    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    #[must_use]
    pub fn is_once(&self) -> bool {
        self.once
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state() == SubscriptionState::Paused
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == SubscriptionState::Cancelled
    }

    /// Active → Paused. Returns `false` if the subscription was not active.
    pub fn pause(&self) -> bool {
        self.transition(SubscriptionState::Active, SubscriptionState::Paused)
    }

    /// Paused → Active. Returns `false` if the subscription was not paused.
    pub fn resume(&self) -> bool {
        self.transition(SubscriptionState::Paused, SubscriptionState::Active)
    }

    /// Any → Cancelled. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        let previous = self
            .state
            .swap(SubscriptionState::Cancelled as u8, Ordering::AcqRel);
        previous != SubscriptionState::Cancelled as u8
    }

    /// Whether the filter (if any) lets `event` through. A panicking filter
    /// rejects the event.
    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        std::panic::catch_unwind(AssertUnwindSafe(|| filter(event))).unwrap_or_else(|_| {
            warn!(subscription_id = %self.id, pattern = %self.pattern, "Subscription filter panicked");
            false
        })
    }

    /// Reserve the single delivery of a one-shot subscription.
    ///
    /// Always succeeds for regular subscriptions.
    pub(crate) fn try_claim(&self) -> bool {
        if !self.once {
            return true;
        }
        self.once_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give back a claim after a delivery that did not succeed.
    pub(crate) fn release_claim(&self) {
        if self.once {
            self.once_claimed.store(false, Ordering::Release);
        }
    }

    fn transition(&self, from: SubscriptionState, to: SubscriptionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("once", &self.once)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Step-by-step construction of a [`Subscription`].
pub struct SubscriptionBuilder {
    pattern: Topic,
    handler: Option<SharedHandler>,
    options: SubscribeOptions,
}

impl SubscriptionBuilder {
    #[must_use]
    pub fn handler(mut self, handler: SharedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.options = self.options.id(id);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.options = self.options.priority(priority);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: DeliveryMode) -> Self {
        self.options = self.options.mode(mode);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.options = self.options.filter(filter);
        self
    }

    #[must_use]
    pub fn once(mut self) -> Self {
        self.options = self.options.once();
        self
    }

    /// # Errors
    ///
    /// `BusError::NilHandler` if no handler was set, `BusError::InvalidTopic`
    /// if the pattern is malformed.
    pub fn build(self) -> Result<Subscription, BusError> {
        let handler = self.handler.ok_or(BusError::NilHandler)?;
        Subscription::new(self.pattern, handler, self.options)
    }
}
