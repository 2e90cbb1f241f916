//! # Topic Trie
//!
//! A prefix tree over topic segments holding the set of registered patterns.
//! Matching one concrete topic walks the tree once instead of testing every
//! pattern, so cost grows with topic depth rather than with pattern count.
//!
//! ## Structure
//!
//! ```text
//! patterns: buffer.*   buffer.saved   **.closed
//!
//!              (root)
//!             /      \
//!         buffer      **
//!         /    \        \
//!        *    saved    closed
//! ```
//!
//! Wildcard tokens are ordinary child keys. A node that has neither children
//! nor terminal patterns is pruned on delete; only the root may be empty.
//!
//! ## Matching
//!
//! `**` can consume any number of segments, so a naive walk re-explores the
//! same subtree once per way of reaching it. Each `match_topic` call keeps a
//! visited set keyed by `(node, depth)`; a state is explored at most once.
//! The memo lives for one call only, since patterns change between calls.

use crate::topic::{split_segments, WILDCARD_MANY, WILDCARD_ONE};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    /// Full patterns terminating at this node, deduplicated.
    patterns: Vec<String>,
}

impl Node {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.patterns.is_empty()
    }

    fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.extend(self.patterns.iter().map(String::as_str));
        for child in self.children.values() {
            child.collect(out);
        }
    }
}

/// Concurrent prefix tree of topic patterns.
///
/// A default-constructed trie has no root until the first insert; every read
/// on it returns empty results.
#[derive(Debug, Default)]
pub struct Trie {
    root: RwLock<Option<Node>>,
}

impl Trie {
    /// Create a trie with its root node allocated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Some(Node::default())),
        }
    }

    /// Register a pattern.
    ///
    /// Returns `true` if the pattern was not already present.
    pub fn insert(&self, pattern: &str) -> bool {
        let mut guard = self.root.write();
        let mut node = guard.get_or_insert_with(Node::default);

        for segment in split_segments(pattern) {
            node = node.children.entry(segment.to_string()).or_default();
        }

        if node.patterns.iter().any(|p| p == pattern) {
            return false;
        }
        node.patterns.push(pattern.to_string());
        true
    }

    /// Remove a pattern, pruning nodes left empty on its path.
    ///
    /// Returns `true` if the pattern was present.
    pub fn remove(&self, pattern: &str) -> bool {
        let mut guard = self.root.write();
        let Some(root) = guard.as_mut() else {
            return false;
        };
        remove_path(root, &split_segments(pattern), pattern)
    }

    /// All registered patterns matching a concrete topic, each at most once.
    #[must_use]
    pub fn match_topic(&self, topic: &str) -> Vec<String> {
        let guard = self.root.read();
        let Some(root) = guard.as_ref() else {
            return Vec::new();
        };

        let segments = split_segments(topic);
        let mut walk = MatchWalk {
            segments: &segments,
            visited: HashSet::new(),
            seen: HashSet::new(),
            found: Vec::new(),
        };
        walk.visit(root, 0);
        walk.found
    }

    /// Whether a pattern is registered at exactly this literal path.
    ///
    /// No wildcard expansion: `match_exact("a.b")` is false when only `a.*`
    /// is registered.
    #[must_use]
    pub fn match_exact(&self, topic: &str) -> bool {
        self.with_terminal(topic, |node| !node.patterns.is_empty())
    }

    /// Whether this exact pattern string is registered.
    #[must_use]
    pub fn contains(&self, pattern: &str) -> bool {
        self.with_terminal(pattern, |node| node.patterns.iter().any(|p| p == pattern))
    }

    /// Every registered pattern, in no particular order.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        let guard = self.root.read();
        let mut out = Vec::new();
        if let Some(root) = guard.as_ref() {
            root.collect(&mut out);
        }
        out.into_iter().map(str::to_string).collect()
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn size(&self) -> usize {
        let guard = self.root.read();
        let mut out = Vec::new();
        if let Some(root) = guard.as_ref() {
            root.collect(&mut out);
        }
        out.len()
    }

    /// Whether no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of allocated nodes, including the root.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.root.read().as_ref().map_or(0, Node::count)
    }

    /// Drop every pattern, keeping an allocated root.
    pub fn clear(&self) {
        let mut guard = self.root.write();
        if let Some(root) = guard.as_mut() {
            *root = Node::default();
        }
    }

    fn with_terminal(&self, path: &str, check: impl FnOnce(&Node) -> bool) -> bool {
        let guard = self.root.read();
        let Some(mut node) = guard.as_ref() else {
            return false;
        };
        for segment in split_segments(path) {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        check(node)
    }
}

fn remove_path(node: &mut Node, segments: &[&str], pattern: &str) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        let before = node.patterns.len();
        node.patterns.retain(|p| p != pattern);
        return node.patterns.len() != before;
    };

    let Some(child) = node.children.get_mut(*head) else {
        return false;
    };

    let removed = remove_path(child, rest, pattern);
    if removed && child.is_empty() {
        node.children.remove(*head);
    }
    removed
}

/// State of a single `match_topic` call.
struct MatchWalk<'a, 's> {
    segments: &'s [&'s str],
    /// `(node address, depth)` pairs already explored.
    visited: HashSet<(usize, usize)>,
    seen: HashSet<&'a str>,
    found: Vec<String>,
}

impl<'a> MatchWalk<'a, '_> {
    fn visit(&mut self, node: &'a Node, depth: usize) {
        let key = (std::ptr::from_ref(node) as usize, depth);
        if !self.visited.insert(key) {
            return;
        }

        if depth == self.segments.len() {
            for pattern in &node.patterns {
                if self.seen.insert(pattern.as_str()) {
                    self.found.push(pattern.clone());
                }
            }
            // A trailing `**` also matches zero remaining segments.
            if let Some(many) = node.children.get(WILDCARD_MANY) {
                self.visit(many, depth);
            }
            return;
        }

        let segment = self.segments[depth];

        if let Some(exact) = node.children.get(segment) {
            self.visit(exact, depth + 1);
        }

        if let Some(one) = node.children.get(WILDCARD_ONE) {
            self.visit(one, depth + 1);
        }

        if let Some(many) = node.children.get(WILDCARD_MANY) {
            for next in depth..=self.segments.len() {
                self.visit(many, next);
            }
        }
    }
}
