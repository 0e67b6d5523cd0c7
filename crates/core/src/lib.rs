//! # lodestone-core
//!
//! Embedded full-text index engine used by every Lodestone node: documents with
//! typed fields, a BM25 inverted index, metadata filters, and a deterministic
//! snapshot export format.
//!
//! This crate has no async or networking dependencies. Replication lives in
//! `lodestone-server`, which feeds committed log entries into [`storage::IndexEngine`].

/// BM25 full-text search: tokenizer, inverted index, and Okapi BM25 scoring.
pub mod bm25;
/// Global configuration constants: limits, defaults, and tuning parameters.
pub mod config;
/// Core document types: `Document` and `FieldValue`.
pub mod document;
/// Engine error type.
pub mod error;
/// Search requests, field filters, and scored results.
pub mod search;
/// Index storage: the engine, its lock-protected data, and snapshot encoding.
pub mod storage;

pub use document::{Document, FieldValue};
pub use error::EngineError;
pub use search::{SearchRequest, SearchResult};
pub use storage::{IndexEngine, IndexStats};
