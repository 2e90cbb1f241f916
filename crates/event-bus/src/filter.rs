//! # Filters
//!
//! Ready-made [`Filter`] predicates and combinators for subscriptions.
//!
//! ```ignore
//! let filter = all_of([from_source("editor"), not(topic_matches("buffer.scratch.**"))]);
//! ```

use crate::event::Event;
use crate::subscription::Filter;
use crate::topic::Topic;
use std::any::Any;
use std::sync::Arc;

/// Accept events whose topic matches `pattern`.
///
/// Uses unmemoised [`Topic::matches`]; fine for a single pattern.
pub fn topic_matches(pattern: impl Into<Topic>) -> Filter {
    let pattern = pattern.into();
    Arc::new(move |event: &Event| {
        event
            .topic()
            .is_some_and(|topic| topic.matches(&pattern))
    })
}

/// Accept events whose metadata names `source`.
pub fn from_source(source: impl Into<String>) -> Filter {
    let source = source.into();
    Arc::new(move |event: &Event| {
        event
            .metadata()
            .and_then(|m| m.source.as_deref())
            .is_some_and(|s| s == source)
    })
}

/// Accept events carrying the given correlation ID.
pub fn correlated_with(correlation_id: impl Into<String>) -> Filter {
    let correlation_id = correlation_id.into();
    Arc::new(move |event: &Event| {
        event
            .metadata()
            .and_then(|m| m.correlation_id.as_deref())
            .is_some_and(|id| id == correlation_id)
    })
}

/// Accept events whose underlying value is a `T`.
#[must_use]
pub fn payload_is<T: Any>() -> Filter {
    Arc::new(|event: &Event| event.downcast_ref::<T>().is_some())
}

/// Accept only when every filter accepts. Empty input accepts everything.
pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Arc::new(move |event: &Event| filters.iter().all(|f| f(event)))
}

/// Accept when at least one filter accepts. Empty input rejects everything.
pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Filter {
    let filters: Vec<Filter> = filters.into_iter().collect();
    Arc::new(move |event: &Event| filters.iter().any(|f| f(event)))
}

#[must_use]
pub fn not(filter: Filter) -> Filter {
    Arc::new(move |event: &Event| !filter(event))
}
