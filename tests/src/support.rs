//! Shared fixtures for the integration tests.

use event_bus::{handler_fn, Context, Event, SharedHandler};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test log formatter once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Ordered log of which handlers ran.
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that appends `name` to the log.
    pub fn handler(&self, name: &str) -> SharedHandler {
        let entries = Arc::clone(&self.entries);
        let name = name.to_string();
        handler_fn(move |_ctx: Context, _event: Event| {
            entries.lock().push(name.clone());
            async { Ok(()) }
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler that counts invocations.
pub fn counter() -> (SharedHandler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let handler = handler_fn(move |_ctx: Context, _event: Event| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    (handler, calls)
}

/// Handler that always panics.
pub fn panicking() -> SharedHandler {
    handler_fn(|_ctx: Context, _event: Event| explode())
}

async fn explode() -> anyhow::Result<()> {
    panic!("handler exploded")
}
