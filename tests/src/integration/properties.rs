//! # Matching Properties
//!
//! The memoised trie must agree with the direct recursive matcher for every
//! pattern set and topic.

#[cfg(test)]
mod tests {
    use event_bus::{Topic, Trie};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn literal_segment() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["a", "b", "c", "buffer", "saved"]).prop_map(str::to_string)
    }

    fn pattern_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => literal_segment(),
            1 => Just("*".to_string()),
            1 => Just("**".to_string()),
        ]
    }

    fn topic() -> impl Strategy<Value = String> {
        prop::collection::vec(literal_segment(), 1..6).prop_map(|s| s.join("."))
    }

    fn pattern() -> impl Strategy<Value = String> {
        prop::collection::vec(pattern_segment(), 1..5).prop_map(|s| s.join("."))
    }

    proptest! {
        #[test]
        fn prop_literal_pattern_matches_only_itself(a in topic(), b in topic()) {
            let topic = Topic::new(a.clone());
            prop_assert_eq!(topic.matches(&Topic::new(b.clone())), a == b);
            prop_assert!(topic.matches(&Topic::new(a)));
        }

        #[test]
        fn prop_double_star_matches_everything(t in topic()) {
            prop_assert!(Topic::new(t).matches(&Topic::new("**")));
        }

        #[test]
        fn prop_trie_agrees_with_direct_match(
            patterns in prop::collection::vec(pattern(), 1..12),
            t in topic(),
        ) {
            let trie = Trie::new();
            for p in &patterns {
                trie.insert(p);
            }

            let topic = Topic::new(t.clone());
            let expected: BTreeSet<String> = patterns
                .iter()
                .filter(|p| topic.matches(&Topic::new(p.as_str())))
                .cloned()
                .collect();

            let matched = trie.match_topic(&t);
            let unique: BTreeSet<String> = matched.iter().cloned().collect();

            prop_assert_eq!(unique.len(), matched.len(), "duplicate pattern returned");
            prop_assert_eq!(unique, expected);
        }

        #[test]
        fn prop_delete_restores_node_count(patterns in prop::collection::vec(pattern(), 1..8)) {
            let trie = Trie::new();
            let baseline = trie.node_count();
            for p in &patterns {
                trie.insert(p);
            }
            for p in &patterns {
                trie.remove(p);
            }
            prop_assert_eq!(trie.node_count(), baseline);
            prop_assert!(trie.is_empty());
        }
    }
}
