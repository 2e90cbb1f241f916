//! # Event Bus
//!
//! Composes the [`Registry`] and both dispatchers behind one publish/subscribe
//! surface.
//!
//! ```text
//! publish_sync(event)                      publish_async(event)
//!        │                                         │
//!        ▼                                         ▼
//!   topic ──► Registry::match_active ──► mode + filter ──► once claim
//!        │                                         │
//!        ▼                                         ▼
//!  SyncDispatcher (inline, priority order)   AsyncDispatcher (queue)
//!        │                                         │
//!        └──────────────► settle() ◄───────────────┘
//!                 stats, once removal, error callback
//! ```
//!
//! ## State
//!
//! - **Running**: `start`/`stop`. Publishing while stopped fails with
//!   `NotRunning`. Subscribing works in any state.
//! - **Paused**: orthogonal to running. A paused bus accepts publishes and
//!   delivers nothing.
//!
//! ## One-shot subscriptions
//!
//! A `once` subscription is claimed before each delivery. Concurrent
//! publishes skip a claimed subscription. Success cancels and unregisters
//! it; any other outcome releases the claim for the next event.

use crate::config::BusConfig;
use crate::context::Context;
use crate::dispatch::{
    AsyncDispatcher, AsyncStats, DispatchError, DispatchResult, Executor, Outcome, PanicHandler,
    SyncDispatcher, SyncStats, Task,
};
use crate::error::BusError;
use crate::event::Event;
use crate::registry::Registry;
use crate::subscription::{handler_fn, DeliveryMode, SharedHandler, SubscribeOptions, Subscription};
use crate::topic::Topic;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback invoked for every handler that returns an error.
pub type ErrorHandler = Arc<dyn Fn(&Subscription, &Event, &anyhow::Error) + Send + Sync>;

// =============================================================================
// TRAITS
// =============================================================================

/// Publishing side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish with the bus's default delivery (async).
    async fn publish(&self, ctx: &Context, event: Event) -> Result<(), BusError>;

    /// Total events accepted for delivery.
    fn events_published(&self) -> u64;
}

/// Subscribing side of the bus.
pub trait EventSubscriber: Send + Sync {
    /// Register a handler for a topic pattern.
    fn subscribe(
        &self,
        pattern: Topic,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<Arc<Subscription>, BusError>;

    /// Cancel and unregister a subscription.
    fn unsubscribe(&self, id: &str) -> Result<(), BusError>;
}

// =============================================================================
// STATS
// =============================================================================

/// Aggregate view of bus and dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Events accepted while running and not paused.
    pub events_published: u64,
    /// Events accepted and discarded because the bus was paused.
    pub events_suppressed: u64,
    /// Handler invocations that actually started.
    pub handlers_executed: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
    /// Async deliveries rejected by a full queue.
    pub deliveries_dropped: u64,
    pub subscriptions: usize,
    pub sync_stats: SyncStats,
    pub async_stats: AsyncStats,
}

#[derive(Debug, Default)]
struct BusCounters {
    events_published: AtomicU64,
    events_suppressed: AtomicU64,
    handlers_executed: AtomicU64,
    handler_errors: AtomicU64,
    handler_panics: AtomicU64,
    deliveries_dropped: AtomicU64,
}

impl BusCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.events_published,
            &self.events_suppressed,
            &self.handlers_executed,
            &self.handler_errors,
            &self.handler_panics,
            &self.deliveries_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// State reachable from async completions and the sweeper.
struct Shared {
    registry: Registry,
    counters: BusCounters,
    on_error: Option<ErrorHandler>,
}

impl Shared {
    /// Account for one finished delivery.
    fn settle(&self, subscription: &Arc<Subscription>, event: &Event, result: &DispatchResult) {
        if !result.is_skipped() {
            BusCounters::bump(&self.counters.handlers_executed);
        }

        match &result.outcome {
            Outcome::Success => {
                if subscription.is_once() {
                    subscription.cancel();
                    if self.registry.remove(subscription.id()).is_ok() {
                        debug!(subscription_id = %subscription.id(), "One-shot subscription completed");
                    }
                }
            }
            Outcome::Failed(err) => {
                BusCounters::bump(&self.counters.handler_errors);
                subscription.release_claim();
                warn!(
                    subscription_id = %subscription.id(),
                    pattern = %subscription.pattern(),
                    timed_out = result.timed_out,
                    error = %err,
                    "Handler failed"
                );
                if let Some(callback) = &self.on_error {
                    let _ = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        callback(subscription.as_ref(), event, err);
                    }));
                }
            }
            Outcome::Panicked(_) => {
                BusCounters::bump(&self.counters.handler_panics);
                subscription.release_claim();
            }
            Outcome::Skipped(reason) => {
                subscription.release_claim();
                debug!(subscription_id = %subscription.id(), reason = %reason, "Delivery skipped");
            }
        }
    }
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// BUS
// =============================================================================

/// In-process publish/subscribe bus.
pub struct EventBus {
    config: BusConfig,
    shared: Arc<Shared>,
    sync: SyncDispatcher,
    dispatcher: AsyncDispatcher,
    running: AtomicBool,
    paused: AtomicBool,
    sweeper: Mutex<Option<Sweeper>>,
}

impl EventBus {
    /// Create a stopped bus.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidConfig` if the configuration does not validate.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    fn assemble(config: BusConfig, on_error: Option<ErrorHandler>, on_panic: Option<PanicHandler>) -> Self {
        let executor = match on_panic {
            Some(callback) => Executor::new().with_panic_handler(callback),
            None => Executor::new(),
        };
        let executor = Arc::new(executor);

        Self {
            sync: SyncDispatcher::new(Arc::clone(&executor), config.sync_timeout()),
            dispatcher: AsyncDispatcher::new(executor, config.dispatcher_config()),
            shared: Arc::new(Shared {
                registry: Registry::new(),
                counters: BusCounters::default(),
                on_error,
            }),
            config,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the async workers and, if configured, the sweeper.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice; a dispatch error if the worker
    /// pool cannot start (no tokio runtime).
    pub fn start(&self) -> Result<(), BusError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BusError::AlreadyRunning);
        }

        if let Err(err) = self.dispatcher.start() {
            self.running.store(false, Ordering::Release);
            return Err(err.into());
        }

        if let Some(interval) = self.config.sweep_interval() {
            let token = CancellationToken::new();
            let handle = tokio::spawn(sweep(Arc::clone(&self.shared), interval, token.clone()));
            *self.sweeper.lock() = Some(Sweeper { token, handle });
        }

        info!(
            workers = self.config.workers,
            queue_size = self.config.queue_size,
            "Event bus started"
        );
        Ok(())
    }

    /// Stop accepting publishes and drain the async queue.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the bus is stopped. A shutdown error if `ctx` is done
    /// before queued deliveries finish; the bus is stopped regardless.
    pub async fn stop(&self, ctx: &Context) -> Result<(), BusError> {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BusError::NotRunning);
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.token.cancel();
            let _ = sweeper.handle.await;
        }

        match self.dispatcher.stop(ctx).await {
            Ok(()) | Err(DispatchError::NotRunning) => {
                info!("Event bus stopped");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Suppress delivery without stopping. Publishes still succeed.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("Event bus paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("Event bus resumed");
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Register `handler` for `pattern`.
    ///
    /// # Errors
    ///
    /// `InvalidTopic` for a malformed pattern, `InvalidSubscription` for a
    /// duplicate ID.
    pub fn subscribe(
        &self,
        pattern: impl Into<Topic>,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<Arc<Subscription>, BusError> {
        self.register(Subscription::new(pattern, handler, options)?)
    }

    /// Register a closure returning a future.
    ///
    /// # Errors
    ///
    /// Same as [`EventBus::subscribe`].
    pub fn subscribe_fn<F, Fut>(
        &self,
        pattern: impl Into<Topic>,
        f: F,
        options: SubscribeOptions,
    ) -> Result<Arc<Subscription>, BusError>
    where
        F: Fn(Context, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(pattern, handler_fn(f), options)
    }

    /// Register a subscription built elsewhere, e.g. with
    /// [`Subscription::builder`].
    ///
    /// # Errors
    ///
    /// `InvalidSubscription` for a duplicate ID.
    pub fn register(&self, subscription: Subscription) -> Result<Arc<Subscription>, BusError> {
        let subscription = Arc::new(subscription);
        self.shared.registry.add(Arc::clone(&subscription))?;
        Ok(subscription)
    }

    /// Cancel a subscription and remove it from the registry.
    ///
    /// # Errors
    ///
    /// `SubscriptionNotFound` if it was already removed.
    pub fn unsubscribe(&self, id: &str) -> Result<(), BusError> {
        let subscription = self.shared.registry.remove(id)?;
        subscription.cancel();
        Ok(())
    }

    #[must_use]
    pub fn subscription(&self, id: &str) -> Option<Arc<Subscription>> {
        self.shared.registry.get(id)
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.len()
    }

    #[must_use]
    pub fn patterns(&self) -> Vec<Topic> {
        self.shared.registry.patterns()
    }

    /// Purge cancelled subscriptions now. Returns how many were removed.
    pub fn remove_cancelled(&self) -> usize {
        self.shared.registry.remove_cancelled()
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Deliver to async subscriptions. Equivalent to
    /// [`EventBus::publish_async`].
    ///
    /// # Errors
    ///
    /// See [`EventBus::publish_async`].
    pub fn publish(&self, ctx: &Context, event: impl Into<Event>) -> Result<(), BusError> {
        self.publish_async(ctx, event)
    }

    /// Run every matching sync subscription inline, in priority order.
    ///
    /// Handler failures never fail the call.
    ///
    /// # Errors
    ///
    /// `NotRunning` if stopped, `InvalidEvent` if the event has no topic.
    pub async fn publish_sync(&self, ctx: &Context, event: impl Into<Event>) -> Result<(), BusError> {
        let event = event.into();
        let Some(topic) = self.admit(&event)? else {
            return Ok(());
        };

        let subscriptions = self.candidates(&topic, &event, DeliveryMode::Sync);
        debug!(topic = %topic, subscribers = subscriptions.len(), "Publishing sync");

        for subscription in subscriptions {
            if !subscription.is_active() || !subscription.try_claim() {
                continue;
            }
            let result = self
                .sync
                .dispatch(ctx, &event, subscription.handler())
                .await;
            self.shared.settle(&subscription, &event, &result);
        }
        Ok(())
    }

    /// Queue every matching async subscription.
    ///
    /// # Errors
    ///
    /// `NotRunning` if stopped, `InvalidEvent` if the event has no topic,
    /// `QueueFull` if any delivery was rejected. The other deliveries are
    /// still queued.
    pub fn publish_async(&self, ctx: &Context, event: impl Into<Event>) -> Result<(), BusError> {
        self.enqueue(ctx, event.into(), None)
    }

    /// Like [`EventBus::publish_async`] with a deadline for each delivery.
    ///
    /// # Errors
    ///
    /// See [`EventBus::publish_async`].
    pub fn publish_with_timeout(
        &self,
        ctx: &Context,
        event: impl Into<Event>,
        timeout: Duration,
    ) -> Result<(), BusError> {
        self.enqueue(ctx, event.into(), Some(timeout))
    }

    fn enqueue(&self, ctx: &Context, event: Event, timeout: Option<Duration>) -> Result<(), BusError> {
        let Some(topic) = self.admit(&event)? else {
            return Ok(());
        };

        let subscriptions = self.candidates(&topic, &event, DeliveryMode::Async);
        debug!(topic = %topic, subscribers = subscriptions.len(), "Publishing async");

        let mut first_error = None;
        for subscription in subscriptions {
            if !subscription.try_claim() {
                continue;
            }

            let shared = Arc::clone(&self.shared);
            let settled = Arc::clone(&subscription);
            let settled_event = event.clone();
            let mut task = Task::new(ctx.clone(), event.clone(), Arc::clone(subscription.handler()))
                .on_complete(Box::new(move |result: &DispatchResult| {
                    shared.settle(&settled, &settled_event, result);
                }));
            if let Some(timeout) = timeout {
                task = task.with_timeout(timeout);
            }

            if let Err(err) = self.dispatcher.enqueue_task(task) {
                subscription.release_claim();
                if matches!(err, DispatchError::QueueFull) {
                    BusCounters::bump(&self.shared.counters.deliveries_dropped);
                }
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    /// Gate shared by every publish path. `Ok(None)`: paused, drop silently.
    fn admit(&self, event: &Event) -> Result<Option<Topic>, BusError> {
        if !self.is_running() {
            return Err(BusError::NotRunning);
        }
        if self.is_paused() {
            BusCounters::bump(&self.shared.counters.events_suppressed);
            return Ok(None);
        }
        let topic = event.topic().ok_or(BusError::InvalidEvent)?;
        BusCounters::bump(&self.shared.counters.events_published);
        Ok(Some(topic))
    }

    fn candidates(&self, topic: &Topic, event: &Event, mode: DeliveryMode) -> Vec<Arc<Subscription>> {
        let mut matched = self.shared.registry.match_active(topic);
        matched.retain(|s| s.mode() == mode && s.accepts(event));
        matched
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BusStats {
            events_published: load(&c.events_published),
            events_suppressed: load(&c.events_suppressed),
            handlers_executed: load(&c.handlers_executed),
            handler_errors: load(&c.handler_errors),
            handler_panics: load(&c.handler_panics),
            deliveries_dropped: load(&c.deliveries_dropped),
            subscriptions: self.shared.registry.len(),
            sync_stats: self.sync.stats(),
            async_stats: self.dispatcher.stats(),
        }
    }

    pub fn reset_stats(&self) {
        self.shared.counters.reset();
        self.sync.reset_stats();
        self.dispatcher.reset_stats();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::assemble(BusConfig::default(), None, None)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, ctx: &Context, event: Event) -> Result<(), BusError> {
        self.publish_async(ctx, event)
    }

    fn events_published(&self) -> u64 {
        self.shared.counters.events_published.load(Ordering::Relaxed)
    }
}

impl EventSubscriber for EventBus {
    fn subscribe(
        &self,
        pattern: Topic,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<Arc<Subscription>, BusError> {
        Self::subscribe(self, pattern, handler, options)
    }

    fn unsubscribe(&self, id: &str) -> Result<(), BusError> {
        Self::unsubscribe(self, id)
    }
}

/// Periodically purge cancelled subscriptions until `token` fires.
async fn sweep(shared: Arc<Shared>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let removed = shared.registry.remove_cancelled();
                if removed > 0 {
                    debug!(removed, "Sweeper purged cancelled subscriptions");
                }
            }
        }
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Configures an [`EventBus`] before construction.
#[derive(Default)]
pub struct EventBusBuilder {
    config: BusConfig,
    on_error: Option<ErrorHandler>,
    on_panic: Option<PanicHandler>,
}

impl EventBusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Called for each handler error, after stats are updated.
    #[must_use]
    pub fn on_error(mut self, callback: ErrorHandler) -> Self {
        self.on_error = Some(callback);
        self
    }

    /// Called for each contained handler panic.
    #[must_use]
    pub fn on_panic(mut self, callback: PanicHandler) -> Self {
        self.on_panic = Some(callback);
        self
    }

    /// # Errors
    ///
    /// `BusError::InvalidConfig` if the configuration does not validate.
    pub fn build(self) -> Result<EventBus, BusError> {
        self.config.validate()?;
        Ok(EventBus::assemble(self.config, self.on_error, self.on_panic))
    }
}
