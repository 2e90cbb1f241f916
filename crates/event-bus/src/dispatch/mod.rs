//! # Dispatch
//!
//! Runs handlers and records what happened.
//!
//! - [`Executor`]: one handler call with panic recovery, timing and an
//!   optional deadline. Shared by both dispatchers.
//! - [`SyncDispatcher`]: runs handlers inline, one at a time, in order.
//! - [`AsyncDispatcher`]: bounded queue drained by a fixed pool of workers.
//!
//! Handler failures and panics are captured in a [`DispatchResult`]; they
//! never propagate to the publisher.

pub mod async_dispatcher;
pub mod executor;
pub mod sync_dispatcher;

pub use async_dispatcher::{AsyncDispatcher, AsyncDispatcherConfig, AsyncStats, Completion, Task};
pub use executor::{Executor, PanicHandler, PanicInfo};
pub use sync_dispatcher::{SyncDispatcher, SyncStats};

use crate::context::ContextError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors from the async dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Async dispatcher already running")]
    AlreadyRunning,

    #[error("Async dispatcher not running")]
    NotRunning,

    /// The bounded queue is full; the task was dropped.
    #[error("Async dispatch queue full")]
    QueueFull,

    #[error("No tokio runtime available to spawn workers")]
    NoRuntime,

    /// Workers did not drain before the shutdown context was done.
    #[error("Async dispatcher shutdown incomplete: {0}")]
    Shutdown(#[from] ContextError),
}

/// How a single handler call ended.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// The handler returned an error.
    Failed(anyhow::Error),
    /// The handler panicked; the panic was contained.
    Panicked(PanicInfo),
    /// The handler was not invoked because the context was already done.
    Skipped(ContextError),
}

/// Result of one handler call. `duration` is measured for every outcome.
#[derive(Debug)]
pub struct DispatchResult {
    pub outcome: Outcome,
    pub duration: Duration,
    /// The failure is attributable to the call's deadline expiring.
    pub timed_out: bool,
}

impl DispatchResult {
    pub(crate) fn skipped(reason: ContextError, duration: Duration) -> Self {
        Self {
            outcome: Outcome::Skipped(reason),
            duration,
            timed_out: false,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    #[must_use]
    pub fn is_panicked(&self) -> bool {
        matches!(self.outcome, Outcome::Panicked(_))
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped(_))
    }

    /// The handler's error, if it returned one.
    #[must_use]
    pub fn error(&self) -> Option<&anyhow::Error> {
        match &self.outcome {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    #[must_use]
    pub fn panic_info(&self) -> Option<&PanicInfo> {
        match &self.outcome {
            Outcome::Panicked(info) => Some(info),
            _ => None,
        }
    }
}

/// Lock-free outcome counters shared by both dispatchers.
#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    pub dispatched: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub skipped: AtomicU64,
    pub timed_out: AtomicU64,
    pub total_nanos: AtomicU64,
}

impl DispatchCounters {
    pub fn record(&self, result: &DispatchResult) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(
            u64::try_from(result.duration.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        let counter = match result.outcome {
            Outcome::Success => &self.succeeded,
            Outcome::Failed(_) => &self.failed,
            Outcome::Panicked(_) => &self.panicked,
            Outcome::Skipped(_) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if result.timed_out {
            self.timed_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        for counter in [
            &self.dispatched,
            &self.succeeded,
            &self.failed,
            &self.panicked,
            &self.skipped,
            &self.timed_out,
            &self.total_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Mean of `total` over `count` calls, zero when nothing ran.
pub(crate) fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_nanos(
            u64::try_from(total.as_nanos() / u128::from(count)).unwrap_or(u64::MAX),
        ),
    }
}
