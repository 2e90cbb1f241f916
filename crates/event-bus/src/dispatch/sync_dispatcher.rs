//! # Synchronous Dispatcher
//!
//! Runs handlers in the caller's task, strictly one after another. The caller
//! is blocked for the full duration of every handler it dispatches.

use super::{average, DispatchCounters, DispatchResult, Executor};
use crate::context::Context;
use crate::event::Event;
use crate::subscription::SharedHandler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of synchronous dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub skipped: u64,
    pub timed_out: u64,
    pub total_duration: Duration,
}

impl SyncStats {
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.dispatched)
    }
}

/// Inline handler execution with running stats.
#[derive(Debug)]
pub struct SyncDispatcher {
    executor: Arc<Executor>,
    default_timeout: Option<Duration>,
    counters: DispatchCounters,
}

impl SyncDispatcher {
    /// `default_timeout` bounds every call; `None` or zero means no deadline
    /// beyond the caller's own context.
    #[must_use]
    pub fn new(executor: Arc<Executor>, default_timeout: Option<Duration>) -> Self {
        Self {
            executor,
            default_timeout: default_timeout.filter(|t| !t.is_zero()),
            counters: DispatchCounters::default(),
        }
    }

    /// Run one handler.
    pub async fn dispatch(&self, ctx: &Context, event: &Event, handler: &SharedHandler) -> DispatchResult {
        let result = match self.default_timeout {
            Some(timeout) => {
                self.executor
                    .execute_with_timeout(ctx, event, handler, timeout)
                    .await
            }
            None => self.executor.execute(ctx, event, handler).await,
        };
        self.counters.record(&result);
        result
    }

    /// Run every handler in order. Once `ctx` is done, the remaining
    /// handlers are reported as skipped without being invoked.
    pub async fn dispatch_all(
        &self,
        ctx: &Context,
        event: &Event,
        handlers: &[SharedHandler],
    ) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            if let Some(reason) = ctx.err() {
                let result = DispatchResult::skipped(reason, Duration::ZERO);
                self.counters.record(&result);
                results.push(result);
                continue;
            }
            results.push(self.dispatch(ctx, event, handler).await);
        }
        results
    }

    /// Run handlers in order, stopping after the first one that does not
    /// succeed. The failing result is the last element.
    pub async fn dispatch_until_error(
        &self,
        ctx: &Context,
        event: &Event,
        handlers: &[SharedHandler],
    ) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let result = self.dispatch(ctx, event, handler).await;
            let stop = !result.is_success();
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            dispatched: DispatchCounters::load(&c.dispatched),
            succeeded: DispatchCounters::load(&c.succeeded),
            failed: DispatchCounters::load(&c.failed),
            panicked: DispatchCounters::load(&c.panicked),
            skipped: DispatchCounters::load(&c.skipped),
            timed_out: DispatchCounters::load(&c.timed_out),
            total_duration: c.total_duration(),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}
