//! # Asynchronous Dispatcher
//!
//! A fixed pool of workers draining one bounded queue.
//!
//! ```text
//! enqueue() ──try_send──► [ bounded queue ] ──► worker 0 ──► Executor
//!     │                                    ├──► worker 1 ──► Executor
//!     └── full: QueueFull, dropped += 1    └──► worker N ──► Executor
//! ```
//!
//! ## Rules
//!
//! - **Backpressure**: enqueue never blocks. A full queue rejects the task
//!   with `QueueFull`; the caller decides whether to drop, retry or escalate.
//! - **Ordering**: FIFO per queue, no cross-worker ordering.
//! - **Shutdown**: `stop` closes the queue, workers drain what is left and
//!   exit. If the shutdown context is done first, `stop` returns an error and
//!   the workers keep draining in the background. No new tasks are accepted.

use super::{average, DispatchCounters, DispatchError, DispatchResult, Executor, Outcome, PanicInfo};
use crate::context::Context;
use crate::event::Event;
use crate::subscription::SharedHandler;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback run on the worker after a task finishes.
pub type Completion = Box<dyn FnOnce(&DispatchResult) + Send>;

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncDispatcherConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded queue capacity.
    pub queue_size: usize,
    /// Deadline applied to tasks that carry none. `None` or zero: no deadline.
    pub default_timeout: Option<Duration>,
}

impl Default for AsyncDispatcherConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            default_timeout: Some(crate::DEFAULT_ASYNC_TIMEOUT),
        }
    }
}

/// One queued handler invocation.
pub struct Task {
    ctx: Context,
    event: Event,
    handler: SharedHandler,
    timeout: Option<Duration>,
    on_complete: Option<Completion>,
}

impl Task {
    #[must_use]
    pub fn new(ctx: Context, event: Event, handler: SharedHandler) -> Self {
        Self {
            ctx,
            event,
            handler,
            timeout: None,
            on_complete: None,
        }
    }

    /// Per-task deadline, overriding the dispatcher default.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: Completion) -> Self {
        self.on_complete = Some(callback);
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("topic", &self.event.topic())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Snapshot of async dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AsyncStats {
    pub enqueued: u64,
    pub processed: u64,
    pub succeeded: u64,
    /// Includes tasks whose context was done before they started.
    pub failed: u64,
    pub panicked: u64,
    pub dropped: u64,
    /// Failures attributable to the task deadline; a subset of `failed`.
    pub timed_out: u64,
    pub queue_depth: usize,
    pub total_duration: Duration,
}

impl AsyncStats {
    #[must_use]
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.processed)
    }
}

#[derive(Debug, Default)]
struct AsyncCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    outcomes: DispatchCounters,
}

struct WorkerPool {
    sender: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

/// Bounded-queue worker pool executing handlers out of band.
pub struct AsyncDispatcher {
    config: AsyncDispatcherConfig,
    executor: Arc<Executor>,
    running: AtomicBool,
    pool: RwLock<Option<WorkerPool>>,
    counters: Arc<AsyncCounters>,
}

impl AsyncDispatcher {
    #[must_use]
    pub fn new(executor: Arc<Executor>, config: AsyncDispatcherConfig) -> Self {
        Self {
            config,
            executor,
            running: AtomicBool::new(false),
            pool: RwLock::new(None),
            counters: Arc::new(AsyncCounters::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AsyncDispatcherConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Allocate the queue and spawn the workers on the current runtime.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if started twice, `NoRuntime` outside a tokio runtime.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut pool = self.pool.write();
        if pool.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let (sender, receiver) = mpsc::channel(self.config.queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = self.config.workers.max(1);

        let workers = (0..worker_count)
            .map(|worker_id| {
                runtime.spawn(worker_loop(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&self.executor),
                    Arc::clone(&self.counters),
                    self.config.default_timeout.filter(|t| !t.is_zero()),
                ))
            })
            .collect();

        *pool = Some(WorkerPool { sender, workers });
        self.running.store(true, Ordering::Release);

        info!(
            workers = worker_count,
            queue_size = self.config.queue_size,
            "Async dispatcher started"
        );
        Ok(())
    }

    /// Close the queue and wait for workers to drain it.
    ///
    /// # Errors
    ///
    /// `NotRunning` if not started. `Shutdown` if `ctx` is done before the
    /// workers finish; they keep running detached.
    pub async fn stop(&self, ctx: &Context) -> Result<(), DispatchError> {
        let pool = self.pool.write().take().ok_or(DispatchError::NotRunning)?;
        self.running.store(false, Ordering::Release);

        let WorkerPool { sender, workers } = pool;
        drop(sender);

        tokio::select! {
            biased;
            _ = futures::future::join_all(workers) => {
                info!("Async dispatcher stopped");
                Ok(())
            }
            reason = ctx.done() => {
                warn!(reason = %reason, "Async dispatcher shutdown did not complete in time");
                Err(DispatchError::Shutdown(reason))
            }
        }
    }

    /// Queue a handler call without a task-specific deadline.
    ///
    /// # Errors
    ///
    /// `NotRunning` before `start` or after `stop`; `QueueFull` when the
    /// queue is at capacity.
    pub fn enqueue(&self, ctx: Context, event: Event, handler: SharedHandler) -> Result<(), DispatchError> {
        self.enqueue_task(Task::new(ctx, event, handler))
    }

    /// Queue a handler call with its own deadline.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncDispatcher::enqueue`].
    pub fn enqueue_with_timeout(
        &self,
        ctx: Context,
        event: Event,
        handler: SharedHandler,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        self.enqueue_task(Task::new(ctx, event, handler).with_timeout(timeout))
    }

    /// Queue a fully configured task.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncDispatcher::enqueue`]. The task is dropped on error and
    /// its completion callback never runs.
    pub fn enqueue_task(&self, task: Task) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::NotRunning);
        }
        let pool = self.pool.read();
        let Some(pool) = pool.as_ref() else {
            return Err(DispatchError::NotRunning);
        };

        match pool.sender.try_send(task) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = ?task.event.topic(), "Async queue full, task dropped");
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::NotRunning),
        }
    }

    /// Tasks waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.pool.read().as_ref().map_or(0, |pool| {
            pool.sender.max_capacity() - pool.sender.capacity()
        })
    }

    #[must_use]
    pub fn stats(&self) -> AsyncStats {
        let c = &self.counters;
        let o = &c.outcomes;
        AsyncStats {
            enqueued: DispatchCounters::load(&c.enqueued),
            processed: DispatchCounters::load(&o.dispatched),
            succeeded: DispatchCounters::load(&o.succeeded),
            failed: DispatchCounters::load(&o.failed) + DispatchCounters::load(&o.skipped),
            panicked: DispatchCounters::load(&o.panicked),
            dropped: DispatchCounters::load(&c.dropped),
            timed_out: DispatchCounters::load(&o.timed_out),
            queue_depth: self.queue_depth(),
            total_duration: o.total_duration(),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.enqueued.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        self.counters.outcomes.reset();
    }
}

impl fmt::Debug for AsyncDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDispatcher")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<Task>>>,
    executor: Arc<Executor>,
    counters: Arc<AsyncCounters>,
    default_timeout: Option<Duration>,
) {
    debug!(worker_id, "Async worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(mut task) = next else {
            break;
        };
        let on_complete = task.on_complete.take();

        let accounted = AtomicBool::new(false);
        let run = AssertUnwindSafe(run_task(
            &executor,
            &counters,
            task,
            default_timeout,
            &accounted,
        ))
        .catch_unwind()
        .await;

        let result = match run {
            Ok(result) => result,
            Err(payload) => {
                let info = PanicInfo::new(payload, Backtrace::force_capture().to_string());
                error!(worker_id, panic = %info.message, "Panic escaped task execution");
                let result = DispatchResult {
                    outcome: Outcome::Panicked(info),
                    duration: Duration::ZERO,
                    timed_out: false,
                };
                if !accounted.load(Ordering::Acquire) {
                    counters.outcomes.record(&result);
                }
                result
            }
        };

        if let Some(callback) = on_complete {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                error!(worker_id, "Task completion callback panicked");
            }
        }
    }
    debug!(worker_id, "Async worker exited");
}

async fn run_task(
    executor: &Executor,
    counters: &AsyncCounters,
    task: Task,
    default_timeout: Option<Duration>,
    accounted: &AtomicBool,
) -> DispatchResult {
    let Task {
        ctx,
        event,
        handler,
        timeout,
        ..
    } = task;

    let result = if let Some(reason) = ctx.err() {
        DispatchResult::skipped(reason, Duration::ZERO)
    } else {
        match timeout.or(default_timeout).filter(|t| !t.is_zero()) {
            Some(limit) => {
                executor
                    .execute_with_timeout(&ctx, &event, &handler, limit)
                    .await
            }
            None => executor.execute(&ctx, &event, &handler).await,
        }
    };

    counters.outcomes.record(&result);
    accounted.store(true, Ordering::Release);

    if result.timed_out {
        warn!(topic = ?event.topic(), duration = ?result.duration, "Async handler timed out");
    }
    result
}
