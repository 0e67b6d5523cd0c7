//! Text analysis for indexing and querying.
//!
//! Lowercases, splits on anything that is not alphanumeric, drops English stop
//! words, single-letter tokens, and tokens longer than
//! [`MAX_TOKEN_LEN`](crate::config::MAX_TOKEN_LEN). The same analysis runs on
//! documents and queries, and is fully deterministic.

use crate::config;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "such", "that",
        "the", "their", "then", "there", "these", "they", "this", "to", "was", "were", "will",
        "with",
    ]
    .into_iter()
    .collect()
});

fn keep(token: &str) -> bool {
    let single_letter = token.chars().count() == 1 && !token.chars().all(|c| c.is_numeric());
    !single_letter && token.len() <= config::MAX_TOKEN_LEN && !STOP_WORDS.contains(token)
}

/// Splits text into normalized terms, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .map(str::to_lowercase)
        .filter(|token| keep(token))
        .collect()
}

/// Counts term frequencies for one document.
///
/// Returns the per-term counts (sorted by term) and the total token count,
/// which is the document length used for BM25 normalization.
pub fn term_frequencies(text: &str) -> (BTreeMap<String, u32>, u32) {
    let mut counts = BTreeMap::new();
    let mut len = 0u32;
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
        len += 1;
    }
    (counts, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_stop_words() {
        let tokens = tokenize("The quick brown fox jumps over the lazy dog");
        assert!(!tokens.contains(&"the".to_string()));
        assert_eq!(tokens[0], "quick");
        assert!(tokens.contains(&"fox".to_string()));
    }

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("raft-log,snapshot;purge"), vec!["raft", "log", "snapshot", "purge"]);
    }

    #[test]
    fn test_tokenize_lowercases_unicode() {
        assert_eq!(tokenize("ÉCOLE Straße"), vec!["école", "straße"]);
    }

    #[test]
    fn test_single_letters_dropped_digits_kept() {
        assert_eq!(tokenize("x 7 y 42"), vec!["7", "42"]);
    }

    #[test]
    fn test_overlong_token_dropped() {
        let long = "z".repeat(config::MAX_TOKEN_LEN + 1);
        assert!(tokenize(&format!("short {long}")).iter().all(|t| t == "short"));
    }

    #[test]
    fn test_term_frequencies() {
        let (tf, len) = term_frequencies("index index search");
        assert_eq!(len, 3);
        assert_eq!(tf.get("index"), Some(&2));
        assert_eq!(tf.get("search"), Some(&1));
    }

    #[test]
    fn test_empty_and_stop_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("the and of").is_empty());
    }
}
