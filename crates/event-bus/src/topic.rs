//! # Topics
//!
//! Hierarchical, dot-separated event keys (`buffer.content.inserted`).
//!
//! ## Wildcards
//!
//! Two reserved segments turn a topic into a *pattern* when it is registered
//! by a subscriber. They never appear in the topic of a published event.
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*`   | exactly one segment |
//! | `**`  | zero or more contiguous segments, anywhere in the pattern |
//!
//! [`Topic::matches`] is the one-off matcher used by filters. Matching a
//! concrete topic against many registered patterns goes through
//! [`crate::trie::Trie`] instead.

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between topic segments.
pub const SEPARATOR: char = '.';

/// Pattern segment matching exactly one topic segment.
pub const WILDCARD_ONE: &str = "*";

/// Pattern segment matching zero or more topic segments.
pub const WILDCARD_MANY: &str = "**";

/// An immutable hierarchical topic or topic pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Create a topic without validating it.
    ///
    /// Validity is advisory: use [`Topic::validate`] before registering
    /// user-supplied patterns.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Create a topic, rejecting empty or malformed input.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidTopic` if the topic is empty, starts or ends
    /// with a separator, or contains an empty segment.
    pub fn parse(topic: impl Into<String>) -> Result<Self, BusError> {
        let topic = Self::new(topic);
        topic.validate()?;
        Ok(topic)
    }

    /// The topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the topic is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into segments. The empty topic has no segments.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        split_segments(&self.0)
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().len()
    }

    /// The topic one level up, or `None` for a single-segment topic.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Append a segment.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            return Self(segment.to_string());
        }
        Self(format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// The first segment.
    #[must_use]
    pub fn root(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or_default()
    }

    /// Whether `prefix` names this topic or one of its ancestors.
    ///
    /// Segment-aware: `buffer` is a prefix of `buffer.saved` but not of
    /// `buffers.saved`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &Topic) -> bool {
        if prefix.is_empty() {
            return true;
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
            None => false,
        }
    }

    /// Whether any segment is a wildcard token.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.segments()
            .iter()
            .any(|s| *s == WILDCARD_ONE || *s == WILDCARD_MANY)
    }

    /// Whether the topic is well-formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check the structural invariants of a topic.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidTopic` describing the first violation found.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.0.is_empty() {
            return Err(BusError::InvalidTopic {
                topic: self.0.clone(),
                reason: "topic is empty",
            });
        }
        if self.0.starts_with(SEPARATOR) || self.0.ends_with(SEPARATOR) {
            return Err(BusError::InvalidTopic {
                topic: self.0.clone(),
                reason: "topic starts or ends with a separator",
            });
        }
        if self.0.split(SEPARATOR).any(str::is_empty) {
            return Err(BusError::InvalidTopic {
                topic: self.0.clone(),
                reason: "topic contains an empty segment",
            });
        }
        Ok(())
    }

    /// Match this concrete topic against a pattern.
    ///
    /// Not memoised: intended for one-off comparisons such as filters.
    #[must_use]
    pub fn matches(&self, pattern: &Topic) -> bool {
        match_segments(&self.segments(), &pattern.segments())
    }
}

/// Split a topic string into its segments.
pub(crate) fn split_segments(topic: &str) -> Vec<&str> {
    if topic.is_empty() {
        return Vec::new();
    }
    topic.split(SEPARATOR).collect()
}

fn match_segments(topic: &[&str], pattern: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return topic.is_empty();
    };

    if *head == WILDCARD_MANY {
        // Try every split point, including consuming nothing.
        return (0..=topic.len()).any(|i| match_segments(&topic[i..], rest));
    }

    let Some((segment, remaining)) = topic.split_first() else {
        return false;
    };

    (*head == WILDCARD_ONE || head == segment) && match_segments(remaining, rest)
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Self(topic)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
