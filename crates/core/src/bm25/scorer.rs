//! BM25 Okapi scoring engine.
//!
//! Scores documents against a query using the BM25 formula with `k1` and `b`
//! from [`crate::config`]. Ranking (ordering, tie-breaks, pagination) is done by
//! the engine, which knows external document ids.

use crate::bm25::inverted_index::InvertedIndex;
use crate::bm25::tokenizer::tokenize;
use crate::config;
use std::collections::{HashMap, HashSet};

/// Scores every document containing at least one query term.
///
/// Repeated query terms count once. Terms are visited in query order, so the
/// floating-point sums are identical on every node for the same index content.
pub fn score_query(index: &InvertedIndex, query: &str) -> HashMap<u32, f32> {
    let mut terms = tokenize(query);
    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.clone()));

    let mut scores = HashMap::new();
    if terms.is_empty() || index.doc_count() == 0 {
        return scores;
    }

    let n = index.doc_count() as f32;
    let avgdl = index.average_doc_length().max(f32::EPSILON);
    let k1 = config::BM25_K1;
    let b = config::BM25_B;

    for term in &terms {
        let Some(postings) = index.postings(term) else {
            continue;
        };
        let df = postings.len() as f32;
        // IDF: ln((N - df + 0.5) / (df + 0.5) + 1), always positive
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

        for posting in postings {
            let dl = index.doc_length(posting.doc_id) as f32;
            let tf = posting.term_frequency as f32;
            let tf_norm = (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * dl / avgdl));
            *scores.entry(posting.doc_id).or_insert(0.0) += idf * tf_norm;
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_corpus() -> InvertedIndex {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, "rust programming systems language fast");
        idx.add_document(1, "python programming scripting easy");
        idx.add_document(2, "java enterprise programming verbose");
        idx.add_document(3, "rust memory safety zero cost abstractions");
        idx
    }

    #[test]
    fn test_empty_query() {
        assert!(score_query(&build_corpus(), "").is_empty());
        assert!(score_query(&build_corpus(), "the of").is_empty());
    }

    #[test]
    fn test_empty_index() {
        assert!(score_query(&InvertedIndex::new(), "rust").is_empty());
    }

    #[test]
    fn test_finds_matching_docs() {
        let scores = score_query(&build_corpus(), "rust");
        assert_eq!(scores.len(), 2);
        assert!(scores.contains_key(&0));
        assert!(scores.contains_key(&3));
    }

    #[test]
    fn test_higher_tf_ranks_higher() {
        let mut idx = InvertedIndex::new();
        idx.add_document(0, "rust rust rust");
        idx.add_document(1, "rust programming");
        let scores = score_query(&idx, "rust");
        assert!(scores[&0] > scores[&1]);
    }

    #[test]
    fn test_rare_term_outweighs_common() {
        let scores = score_query(&build_corpus(), "programming enterprise");
        // doc 2 matches both, and "enterprise" is rarer than "programming"
        let best = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(id, _)| *id);
        assert_eq!(best, Some(2));
    }

    #[test]
    fn test_repeated_query_terms_count_once() {
        let idx = build_corpus();
        let once = score_query(&idx, "rust");
        let twice = score_query(&idx, "rust rust");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_scores_positive() {
        for score in score_query(&build_corpus(), "programming").values() {
            assert!(*score > 0.0);
        }
    }
}
