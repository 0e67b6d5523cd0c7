//! Search request and result types.

use crate::config;
use crate::document::Document;
use crate::error::EngineError;
use crate::search::filter::FilterClause;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_size() -> usize {
    config::DEFAULT_SEARCH_SIZE
}

/// A full-text query with optional field filters and pagination.
///
/// With a non-empty `query`, hits are ranked by BM25 and only documents
/// containing at least one query term match. With an empty `query` every
/// document passing the filter (all of them, without one) matches with
/// score 0, ordered by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub from: usize,
    #[serde(default)]
    pub filter: Option<FilterClause>,
    /// Restricts which fields are returned with each hit. `None` returns all.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            size: default_size(),
            from: 0,
            filter: None,
            fields: None,
        }
    }
}

impl SearchRequest {
    /// A plain text query with default paging.
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.size == 0 || self.size > config::MAX_K {
            return Err(EngineError::InvalidQuery(format!(
                "size must be between 1 and {}",
                config::MAX_K
            )));
        }
        if self.from > config::MAX_OFFSET {
            return Err(EngineError::InvalidQuery(format!(
                "from must be at most {}",
                config::MAX_OFFSET
            )));
        }
        if let Some(filter) = &self.filter {
            filter.validate()?;
        }
        Ok(())
    }
}

/// A document with its relevance score.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Arc<Document>,
    /// BM25 score; 0 for filter-only queries.
    pub score: f32,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// Number of matching documents before pagination.
    pub total: usize,
    pub hits: Vec<ScoredDocument>,
}
