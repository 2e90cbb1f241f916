//! # Event Bus - Topic-Addressed In-Process Publish/Subscribe
//!
//! Decouples components of one process. Producers publish events under
//! hierarchical dot-separated topics; consumers subscribe with exact topics
//! or wildcard patterns.
//!
//! ## Topics and Patterns
//!
//! | Pattern | Matches | Does not match |
//! |---------|---------|----------------|
//! | `buffer.saved` | `buffer.saved` | `buffer.saved.twice` |
//! | `buffer.*` | `buffer.saved` | `buffer`, `buffer.content.inserted` |
//! | `buffer.**` | `buffer`, `buffer.content.inserted` | `cursor.moved` |
//! | `**` | every non-empty topic | |
//!
//! ## Delivery
//!
//! ```text
//! ┌───────────┐  publish_sync()   ┌──────────┐   inline, priority order
//! │ Publisher │ ────────────────► │          │ ──────────────────────► handlers
//! │           │  publish_async()  │ EventBus │   bounded queue + workers
//! │           │ ────────────────► │          │ ──────────────────────► handlers
//! └───────────┘                   └──────────┘
//! ```
//!
//! - Handlers run in priority order (lower value first) across every
//!   matching pattern.
//! - A failing or panicking handler never stops its siblings and never
//!   fails the publish call.
//! - A full async queue rejects the delivery with `QueueFull` instead of
//!   blocking the publisher.
//!
//! ## Example
//!
//! ```ignore
//! let bus = EventBus::new(BusConfig::default())?;
//! bus.subscribe_fn("buffer.*", |_ctx, event| async move {
//!     tracing::info!(topic = ?event.topic(), "buffer changed");
//!     Ok(())
//! }, SubscribeOptions::default())?;
//!
//! bus.start()?;
//! bus.publish_sync(&Context::background(), Event::envelope("buffer.saved", ())).await?;
//! bus.stop(&Context::background().with_timeout(Duration::from_secs(5))).await?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod matcher;
pub mod registry;
pub mod subscription;
pub mod topic;
pub mod trie;

// Re-export main types
pub use bus::{BusStats, ErrorHandler, EventBus, EventBusBuilder, EventPublisher, EventSubscriber};
pub use config::BusConfig;
pub use context::{Context, ContextError};
pub use dispatch::{
    AsyncDispatcher, AsyncDispatcherConfig, AsyncStats, DispatchError, DispatchResult, Executor,
    Outcome, PanicHandler, PanicInfo, SyncDispatcher, SyncStats, Task,
};
pub use error::BusError;
pub use event::{DomainEvent, Envelope, Event, Metadata, MetadataProvider, Payload, TopicProvider};
pub use filter::{all_of, any_of, correlated_with, from_source, not, payload_is, topic_matches};
pub use matcher::Matcher;
pub use registry::Registry;
pub use subscription::{
    handler_fn, DeliveryMode, Filter, Handler, Priority, PriorityBand, SharedHandler,
    SubscribeOptions, Subscription, SubscriptionBuilder, SubscriptionState,
};
pub use topic::Topic;
pub use trie::Trie;

use std::time::Duration;

/// Async queue capacity when none is configured.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Deadline for async deliveries when none is configured.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(30);
