//! # Bus Errors
//!
//! Only the publish/subscribe/lifecycle calls themselves return these.
//! Handler failures never surface here; they are visible through stats and
//! the error/panic callbacks.

use crate::dispatch::DispatchError;
use thiserror::Error;

/// Errors returned by the bus, the registry and subscription construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    // =========================================================================
    // LIFECYCLE
    // =========================================================================
    /// `start` was called on a running bus.
    #[error("Event bus already running")]
    AlreadyRunning,

    /// Publish or stop was called before `start`.
    #[error("Event bus not running")]
    NotRunning,

    // =========================================================================
    // VALIDATION
    // =========================================================================
    /// A topic or pattern is empty or malformed.
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// A subscription was built without a handler.
    #[error("Subscription handler is missing")]
    NilHandler,

    /// The published value exposes no topic.
    #[error("Invalid event: no topic could be extracted")]
    InvalidEvent,

    /// The subscription cannot be registered.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// No subscription with this ID is registered.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // DISPATCH
    // =========================================================================
    /// The async dispatcher refused or failed an operation.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl BusError {
    /// Whether this error is async backpressure (the event was dropped).
    #[must_use]
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::Dispatch(DispatchError::QueueFull))
    }
}
