//! Bus configuration from code or environment variables.

use crate::dispatch::AsyncDispatcherConfig;
use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration for an [`EventBus`](crate::EventBus).
///
/// Durations are milliseconds; `0` disables the corresponding deadline or
/// background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Async worker count
    pub workers: usize,

    /// Async queue capacity
    pub queue_size: usize,

    /// Deadline applied to every synchronous handler call
    pub sync_timeout_ms: u64,

    /// Deadline applied to async tasks that carry none of their own
    pub async_timeout_ms: u64,

    /// Period of the cancelled-subscription sweeper
    pub sweep_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            sync_timeout_ms: 0,
            async_timeout_ms: duration_ms(crate::DEFAULT_ASYNC_TIMEOUT),
            sweep_interval_ms: 0,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EVENT_BUS_WORKERS`: Async worker count (default: CPU count)
    /// - `EVENT_BUS_QUEUE_SIZE`: Async queue capacity (default: 1000)
    /// - `EVENT_BUS_SYNC_TIMEOUT_MS`: Sync handler deadline (default: 0, none)
    /// - `EVENT_BUS_ASYNC_TIMEOUT_MS`: Async task deadline (default: 30000)
    /// - `EVENT_BUS_SWEEP_INTERVAL_MS`: Sweeper period (default: 0, disabled)
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            workers: parse("EVENT_BUS_WORKERS")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.workers),

            queue_size: parse("EVENT_BUS_QUEUE_SIZE")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.queue_size),

            sync_timeout_ms: parse("EVENT_BUS_SYNC_TIMEOUT_MS").unwrap_or(defaults.sync_timeout_ms),

            async_timeout_ms: parse("EVENT_BUS_ASYNC_TIMEOUT_MS")
                .unwrap_or(defaults.async_timeout_ms),

            sweep_interval_ms: parse("EVENT_BUS_SWEEP_INTERVAL_MS")
                .unwrap_or(defaults.sweep_interval_ms),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = duration_ms(interval);
        self
    }

    /// Check that the configuration can drive a bus.
    ///
    /// # Errors
    ///
    /// `BusError::InvalidConfig` if the worker count or queue size is zero.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.workers == 0 {
            return Err(BusError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(BusError::InvalidConfig("queue_size must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn sync_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.sync_timeout_ms)
    }

    #[must_use]
    pub fn async_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.async_timeout_ms)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        non_zero_ms(self.sweep_interval_ms)
    }

    /// Settings for the bus's async worker pool.
    #[must_use]
    pub fn dispatcher_config(&self) -> AsyncDispatcherConfig {
        AsyncDispatcherConfig {
            workers: self.workers,
            queue_size: self.queue_size,
            default_timeout: self.async_timeout(),
        }
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
