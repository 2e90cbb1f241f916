//! # Handler Executor
//!
//! Runs exactly one handler call and turns whatever happens into a
//! [`DispatchResult`]: success, returned error, contained panic, or skip
//! because the context was done before the call started.

use super::{DispatchResult, Outcome};
use crate::context::{Context, ContextError};
use crate::event::Event;
use crate::subscription::SharedHandler;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Callback invoked for every contained handler panic.
pub type PanicHandler = Arc<dyn Fn(&Event, &PanicInfo) + Send + Sync>;

/// A handler panic that was caught.
#[derive(Debug, Clone)]
pub struct PanicInfo {
    /// Panic payload rendered as text.
    pub message: String,
    /// Backtrace captured where the panic was caught.
    pub backtrace: String,
    payload: Arc<Mutex<Box<dyn Any + Send>>>,
}

impl PanicInfo {
    pub(crate) fn new(payload: Box<dyn Any + Send>, backtrace: String) -> Self {
        Self {
            message: panic_message(payload.as_ref()),
            backtrace,
            payload: Arc::new(Mutex::new(payload)),
        }
    }

    /// The raw panic value, if it is a `T`.
    #[must_use]
    pub fn downcast_payload<T: Any + Clone>(&self) -> Option<T> {
        self.payload.lock().downcast_ref::<T>().cloned()
    }
}

/// Executes handler calls with panic recovery and timing.
#[derive(Default, Clone)]
pub struct Executor {
    panic_handler: Option<PanicHandler>,
}

impl Executor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a callback for contained panics. A panic inside the callback
    /// itself is swallowed.
    #[must_use]
    pub fn with_panic_handler(mut self, handler: PanicHandler) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    /// Run `handler` once under `ctx`.
    pub async fn execute(&self, ctx: &Context, event: &Event, handler: &SharedHandler) -> DispatchResult {
        let started = Instant::now();

        if let Some(reason) = ctx.err() {
            return DispatchResult::skipped(reason, started.elapsed());
        }

        let call = AssertUnwindSafe(async { handler.handle(ctx.clone(), event.clone()).await })
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        match call {
            Ok(Ok(())) => DispatchResult {
                outcome: Outcome::Success,
                duration,
                timed_out: false,
            },
            Ok(Err(error)) => {
                let timed_out = is_deadline_error(&error)
                    || ctx.err() == Some(ContextError::DeadlineExceeded);
                DispatchResult {
                    outcome: Outcome::Failed(error),
                    duration,
                    timed_out,
                }
            }
            Err(payload) => {
                let info = PanicInfo::new(payload, Backtrace::force_capture().to_string());
                warn!(
                    topic = ?event.topic(),
                    panic = %info.message,
                    "Handler panicked"
                );
                self.notify_panic(event, &info);
                DispatchResult {
                    outcome: Outcome::Panicked(info),
                    duration,
                    timed_out: false,
                }
            }
        }
    }

    /// Run `handler` under a child of `ctx` that expires after `timeout`.
    pub async fn execute_with_timeout(
        &self,
        ctx: &Context,
        event: &Event,
        handler: &SharedHandler,
        timeout: Duration,
    ) -> DispatchResult {
        let scoped = ctx.with_timeout(timeout);
        self.execute(&scoped, event, handler).await
    }

    fn notify_panic(&self, event: &Event, info: &PanicInfo) {
        let Some(callback) = &self.panic_handler else {
            return;
        };
        let _ = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event, info)));
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

fn is_deadline_error(error: &anyhow::Error) -> bool {
    error.downcast_ref::<ContextError>() == Some(&ContextError::DeadlineExceeded)
}

/// Render a panic payload. `panic!` produces `&str` or `String`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
