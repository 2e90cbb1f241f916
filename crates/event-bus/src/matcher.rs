//! # Pattern Matcher
//!
//! Thin façade over [`Trie`] in the vocabulary the registry uses.

use crate::topic::Topic;
use crate::trie::Trie;

/// Resolves which registered patterns apply to a concrete topic.
#[derive(Debug)]
pub struct Matcher {
    trie: Trie,
}

impl Matcher {
    #[must_use]
    pub fn new() -> Self {
        Self { trie: Trie::new() }
    }

    /// Register a pattern. Idempotent; returns `true` on first registration.
    pub fn add(&self, pattern: &Topic) -> bool {
        self.trie.insert(pattern.as_str())
    }

    /// Unregister a pattern. Returns `true` if it was registered.
    pub fn remove(&self, pattern: &Topic) -> bool {
        self.trie.remove(pattern.as_str())
    }

    /// Patterns matching `topic`, without duplicates.
    #[must_use]
    pub fn matches(&self, topic: &Topic) -> Vec<Topic> {
        self.trie
            .match_topic(topic.as_str())
            .into_iter()
            .map(Topic::from)
            .collect()
    }

    /// Whether `pattern` itself is registered.
    #[must_use]
    pub fn has_pattern(&self, pattern: &Topic) -> bool {
        self.trie.contains(pattern.as_str())
    }

    #[must_use]
    pub fn patterns(&self) -> Vec<Topic> {
        self.trie.all().into_iter().map(Topic::from).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.trie.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn clear(&self) {
        self.trie.clear();
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}
