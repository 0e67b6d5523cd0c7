//! BM25 full-text search over an inverted index.

/// Postings lists keyed by term.
pub mod inverted_index;
/// Okapi BM25 scoring.
pub mod scorer;
/// Text analysis.
pub mod tokenizer;

pub use inverted_index::{InvertedIndex, Posting};
pub use scorer::score_query;
pub use tokenizer::{term_frequencies, tokenize};
