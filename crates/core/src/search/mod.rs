//! Search primitives: requests, field filters, and scored results.

/// Field filter clauses and their evaluation.
pub mod filter;
/// Search request and result types.
pub mod types;

pub use filter::{matches_filter, FilterClause, FilterCondition, FilterOperator};
pub use types::{ScoredDocument, SearchRequest, SearchResult};
