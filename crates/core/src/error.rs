//! Errors raised by the index engine.

use thiserror::Error;

/// Errors from document validation, query validation, and snapshot decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The document is malformed (bad id, too many fields, non-finite float, ...).
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    /// The search request is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Exported index bytes failed integrity or structural checks.
    #[error("corrupt index data: {0}")]
    Corrupt(String),
}
