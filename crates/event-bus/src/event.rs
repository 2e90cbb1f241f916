//! # Events
//!
//! The bus never looks inside a payload. It needs two things from a published
//! value: its topic (mandatory, for matching) and its metadata (optional, for
//! filters and diagnostics). Both are exposed through small capability traits.
//!
//! ## Shapes of a published value
//!
//! | Variant | Topic | Metadata |
//! |---------|-------|----------|
//! | [`Event::Domain`] | [`TopicProvider`] | [`MetadataProvider`] |
//! | [`Event::Envelope`] | envelope field | envelope field |
//! | [`Event::Opaque`] | none, rejected on publish | none |

use crate::topic::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Type-erased payload carried by an [`Envelope`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Values that know which topic they are published under.
pub trait TopicProvider {
    fn topic(&self) -> Topic;
}

/// Values that carry event metadata.
pub trait MetadataProvider {
    /// Metadata for this value, if it has any.
    fn metadata(&self) -> Option<&Metadata> {
        None
    }
}

/// A strongly-typed event defined outside the bus.
///
/// Implemented automatically for every `TopicProvider + MetadataProvider`
/// type that is `Debug + Send + Sync + 'static`.
pub trait DomainEvent: TopicProvider + MetadataProvider + fmt::Debug + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

impl<T> DomainEvent for T
where
    T: TopicProvider + MetadataProvider + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Event identity and causality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique event identifier.
    pub id: Uuid,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Component that produced the event.
    pub source: Option<String>,
    /// Groups every event of one logical operation.
    pub correlation_id: Option<String>,
    /// ID of the event that directly caused this one.
    pub causation_id: Option<String>,
    /// Payload schema version.
    pub version: u16,
}

impl Metadata {
    /// Schema version assigned when none is given.
    pub const DEFAULT_VERSION: u16 = 1;

    /// Fresh metadata: random ID, current time, version 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: None,
            correlation_id: None,
            causation_id: None,
            version: Self::DEFAULT_VERSION,
        }
    }

    /// Fill the ID and version if they were left unset.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.id.is_nil() {
            self.id = Uuid::new_v4();
        }
        if self.version == 0 {
            self.version = Self::DEFAULT_VERSION;
        }
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Link this event to the event that caused it.
    ///
    /// The correlation ID is inherited from the parent, or started from the
    /// parent's ID if the parent had none.
    #[must_use]
    pub fn caused_by(mut self, parent: &Metadata) -> Self {
        let parent_id = parent.id.to_string();
        self.correlation_id = Some(
            parent
                .correlation_id
                .clone()
                .unwrap_or_else(|| parent_id.clone()),
        );
        self.causation_id = Some(parent_id);
        self
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic `{topic, payload, metadata}` wrapper for values that do not
/// implement [`TopicProvider`] themselves.
#[derive(Clone)]
pub struct Envelope {
    topic: Topic,
    payload: Payload,
    metadata: Metadata,
}

impl Envelope {
    /// Wrap a payload with fresh metadata.
    pub fn new<T>(topic: impl Into<Topic>, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            topic: topic.into(),
            payload: Arc::new(payload),
            metadata: Metadata::new(),
        }
    }

    /// Replace the metadata; unset ID and version are filled in.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata.with_defaults();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_source(source);
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_correlation_id(id);
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.metadata = self.metadata.with_causation_id(id);
        self
    }

    #[must_use]
    pub fn topic_ref(&self) -> &Topic {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Downcast the payload.
    #[must_use]
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl TopicProvider for Envelope {
    fn topic(&self) -> Topic {
        self.topic.clone()
    }
}

impl MetadataProvider for Envelope {
    fn metadata(&self) -> Option<&Metadata> {
        Some(&self.metadata)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A published value. Cheap to clone; every handler sees the same instance.
#[derive(Clone, Debug)]
pub enum Event {
    /// A typed event implementing the provider traits.
    Domain(Arc<dyn DomainEvent>),
    /// A payload wrapped with topic and metadata.
    Envelope(Arc<Envelope>),
    /// A bare value exposing nothing. Publishing it fails.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Event {
    pub fn new<E: DomainEvent>(event: E) -> Self {
        Self::Domain(Arc::new(event))
    }

    /// Shorthand for `Envelope::new(topic, payload).into()`.
    pub fn envelope<T>(topic: impl Into<Topic>, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::Envelope(Arc::new(Envelope::new(topic, payload)))
    }

    pub fn opaque<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::Opaque(Arc::new(value))
    }

    /// The topic to route this event under.
    ///
    /// `None` for opaque values and for any event whose topic is empty.
    #[must_use]
    pub fn topic(&self) -> Option<Topic> {
        let topic = match self {
            Self::Domain(event) => event.topic(),
            Self::Envelope(envelope) => envelope.topic(),
            Self::Opaque(_) => return None,
        };
        (!topic.is_empty()).then_some(topic)
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Domain(event) => event.metadata(),
            Self::Envelope(envelope) => Some(&envelope.metadata),
            Self::Opaque(_) => None,
        }
    }

    /// Downcast the underlying value (the payload, for envelopes).
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Domain(event) => event.as_any().downcast_ref::<T>(),
            Self::Envelope(envelope) => envelope.payload_as::<T>(),
            Self::Opaque(value) => value.downcast_ref::<T>(),
        }
    }
}

impl From<Envelope> for Event {
    fn from(envelope: Envelope) -> Self {
        Self::Envelope(Arc::new(envelope))
    }
}
