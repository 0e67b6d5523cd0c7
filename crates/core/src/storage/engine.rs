//! The index engine: documents plus their inverted index behind one lock.
//!
//! [`IndexEngine`] is a cheap-to-clone handle to shared [`IndexData`]. Mutations
//! (upsert, delete, import) take the write lock; reads (get, search, stats,
//! export) take the read lock, so a reader never sees a half-applied document.
//! Given the same sequence of mutations, two engines hold identical content and
//! export identical bytes.

use crate::bm25::{score_query, InvertedIndex};
use crate::document::{self, Document, FieldValue};
use crate::error::EngineError;
use crate::search::{matches_filter, ScoredDocument, SearchRequest, SearchResult};
use crate::storage::persistence;
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Lock-protected index content.
///
/// Each live document occupies an internal `u32` slot in the inverted index.
/// Slots are node-local: they never leave this struct and never influence
/// results, so they may differ between nodes.
#[derive(Debug, Default)]
pub struct IndexData {
    documents: BTreeMap<String, Arc<Document>>,
    inverted: InvertedIndex,
    id_to_slot: HashMap<String, u32>,
    slot_to_id: Vec<Option<String>>,
    free_slots: Vec<u32>,
}

impl IndexData {
    fn from_documents(documents: Vec<Document>) -> Self {
        let mut data = Self::default();
        for doc in documents {
            data.upsert(doc);
        }
        data
    }

    fn allocate_slot(&mut self, id: &str) -> u32 {
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slot_to_id[slot as usize] = Some(id.to_string());
                slot
            }
            None => {
                self.slot_to_id.push(Some(id.to_string()));
                (self.slot_to_id.len() - 1) as u32
            }
        };
        self.id_to_slot.insert(id.to_string(), slot);
        slot
    }

    /// Inserts or replaces a document. Returns `true` if it replaced one.
    fn upsert(&mut self, doc: Document) -> bool {
        let slot = match self.id_to_slot.get(&doc.id) {
            Some(&slot) => slot,
            None => self.allocate_slot(&doc.id),
        };
        self.inverted.add_document(slot, &doc.searchable_text());
        self.documents
            .insert(doc.id.clone(), Arc::new(doc))
            .is_some()
    }

    fn remove(&mut self, id: &str) -> bool {
        if self.documents.remove(id).is_none() {
            return false;
        }
        if let Some(slot) = self.id_to_slot.remove(id) {
            self.inverted.remove_document(slot);
            self.slot_to_id[slot as usize] = None;
            self.free_slots.push(slot);
        }
        true
    }

    /// Checks that documents, slot maps, and the inverted index agree.
    pub fn validate(&self) -> Result<(), String> {
        if self.documents.len() != self.id_to_slot.len() {
            return Err(format!(
                "documents({}) != id_to_slot({})",
                self.documents.len(),
                self.id_to_slot.len()
            ));
        }
        if self.inverted.doc_count() as usize != self.documents.len() {
            return Err(format!(
                "inverted index holds {} documents, store holds {}",
                self.inverted.doc_count(),
                self.documents.len()
            ));
        }
        for (id, &slot) in &self.id_to_slot {
            match self.slot_to_id.get(slot as usize) {
                Some(Some(owner)) if owner == id => {}
                _ => return Err(format!("slot {slot} is not owned by '{id}'")),
            }
        }
        let occupied = self.slot_to_id.iter().filter(|s| s.is_some()).count();
        if occupied + self.free_slots.len() != self.slot_to_id.len() {
            return Err("free slot list out of sync".into());
        }
        Ok(())
    }
}

/// Summary statistics of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub document_count: usize,
    /// Distinct indexed terms.
    pub term_count: usize,
    /// Mean token count per document.
    pub average_document_length: f32,
}

/// Thread-safe handle to the index. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct IndexEngine {
    data: Arc<RwLock<IndexData>>,
}

impl IndexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document with `id`, if present.
    pub fn get(&self, id: &str) -> Option<Arc<Document>> {
        self.data.read().documents.get(id).cloned()
    }

    /// Validates and inserts a document, replacing any document with the same id.
    /// Returns `true` if an existing document was replaced.
    pub fn upsert(&self, doc: Document) -> Result<bool, EngineError> {
        doc.validate()?;
        Ok(self.data.write().upsert(doc))
    }

    /// Removes a document. Returns `false` if it did not exist.
    pub fn delete(&self, id: &str) -> Result<bool, EngineError> {
        document::validate_id(id)?;
        Ok(self.data.write().remove(id))
    }

    /// Runs a search.
    ///
    /// Hits are ordered by descending score, ties broken by ascending document
    /// id, then paginated with `from`/`size`.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, EngineError> {
        request.validate()?;
        let data = self.data.read();
        let filter = request.filter.as_ref().filter(|f| !f.is_empty());
        let passes =
            |fields: &BTreeMap<String, FieldValue>| filter.map_or(true, |f| matches_filter(fields, f));

        let mut matched: Vec<(f32, &Arc<Document>)> = if request.query.trim().is_empty() {
            data.documents
                .values()
                .filter(|doc| passes(&doc.fields))
                .map(|doc| (0.0, doc))
                .collect()
        } else {
            score_query(&data.inverted, &request.query)
                .into_iter()
                .filter_map(|(slot, score)| {
                    let id = data.slot_to_id.get(slot as usize)?.as_ref()?;
                    let doc = data.documents.get(id)?;
                    passes(&doc.fields).then_some((score, doc))
                })
                .collect()
        };

        let total = matched.len();
        matched.sort_unstable_by(|a, b| {
            OrderedFloat(b.0)
                .cmp(&OrderedFloat(a.0))
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        let hits = matched
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|(score, doc)| ScoredDocument {
                document: Arc::clone(doc),
                score,
            })
            .collect();
        Ok(SearchResult { total, hits })
    }

    pub fn document_count(&self) -> usize {
        self.data.read().documents.len()
    }

    pub fn stats(&self) -> IndexStats {
        let data = self.data.read();
        IndexStats {
            document_count: data.documents.len(),
            term_count: data.inverted.term_count(),
            average_document_length: data.inverted.average_doc_length(),
        }
    }

    /// Serializes the full index content. Deterministic for equal content.
    pub fn export(&self) -> Result<Vec<u8>, EngineError> {
        let data = self.data.read();
        persistence::encode_documents(data.documents.values().map(|d| d.as_ref()))
            .map_err(|e| EngineError::Corrupt(e.to_string()))
    }

    /// Replaces the whole index with content produced by [`export`](Self::export).
    ///
    /// The bytes are fully decoded and checked before the current content is
    /// touched; on error the engine is unchanged. Returns the document count.
    pub fn import(&self, bytes: &[u8]) -> Result<usize, EngineError> {
        let documents =
            persistence::decode_documents(bytes).map_err(|e| EngineError::Corrupt(e.to_string()))?;
        let rebuilt = IndexData::from_documents(documents);
        rebuilt.validate().map_err(EngineError::Corrupt)?;
        let count = rebuilt.documents.len();
        *self.data.write() = rebuilt;
        tracing::debug!(documents = count, "index content replaced");
        Ok(count)
    }

    /// CRC32 of the exported content; equal across nodes with equal content.
    pub fn checksum(&self) -> Result<u32, EngineError> {
        Ok(crc32fast::hash(&self.export()?))
    }

    /// Checks that the document store and the inverted index agree.
    pub fn validate(&self) -> Result<(), String> {
        self.data.read().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{FilterClause, FilterCondition, FilterOperator};
    use serde_json::json;

    fn doc(id: &str, body: &str) -> Document {
        Document::new(id, BTreeMap::new()).with_field("body", FieldValue::Text(body.into()))
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    #[test]
    fn test_upsert_and_get() {
        let engine = IndexEngine::new();
        assert!(!engine.upsert(doc("a", "hello world")).unwrap());
        let fetched = engine.get("a").unwrap();
        assert_eq!(fetched.id, "a");
        assert_eq!(engine.document_count(), 1);
        assert!(engine.get("missing").is_none());
    }

    #[test]
    fn test_upsert_replaces_content() {
        let engine = IndexEngine::new();
        engine.upsert(doc("a", "old text")).unwrap();
        assert!(engine.upsert(doc("a", "new words")).unwrap());
        assert_eq!(engine.document_count(), 1);
        assert_eq!(engine.search(&SearchRequest::text("old")).unwrap().total, 0);
        assert_eq!(engine.search(&SearchRequest::text("words")).unwrap().total, 1);
        engine.validate().unwrap();
    }

    #[test]
    fn test_upsert_rejects_invalid() {
        let engine = IndexEngine::new();
        let bad = doc("a", "x").with_field("f", FieldValue::Float(f64::NAN));
        assert!(matches!(engine.upsert(bad), Err(EngineError::InvalidDocument(_))));
        assert_eq!(engine.document_count(), 0);
    }

    #[test]
    fn test_delete() {
        let engine = IndexEngine::new();
        engine.upsert(doc("a", "hello")).unwrap();
        assert!(engine.delete("a").unwrap());
        assert!(!engine.delete("a").unwrap());
        assert!(engine.get("a").is_none());
        assert_eq!(engine.search(&SearchRequest::text("hello")).unwrap().total, 0);
        engine.validate().unwrap();
    }

    #[test]
    fn test_slots_reused_after_delete() {
        let engine = IndexEngine::new();
        for i in 0..10 {
            engine.upsert(doc(&format!("d{i}"), "churn")).unwrap();
            engine.delete(&format!("d{i}")).unwrap();
        }
        engine.upsert(doc("last", "churn")).unwrap();
        assert_eq!(engine.data.read().slot_to_id.len(), 1);
        engine.validate().unwrap();
    }

    #[test]
    fn test_search_ranking_and_tie_break() {
        let engine = IndexEngine::new();
        engine.upsert(doc("c", "raft consensus")).unwrap();
        engine.upsert(doc("b", "raft consensus")).unwrap();
        engine.upsert(doc("a", "raft raft raft consensus")).unwrap();
        engine.upsert(doc("z", "unrelated")).unwrap();

        let result = engine.search(&SearchRequest::text("raft")).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(ids(&result), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_search_pagination() {
        let engine = IndexEngine::new();
        for i in 0..5 {
            engine.upsert(doc(&format!("d{i}"), "same text")).unwrap();
        }
        let req = SearchRequest {
            size: 2,
            from: 2,
            ..SearchRequest::text("text")
        };
        let result = engine.search(&req).unwrap();
        assert_eq!(result.total, 5);
        assert_eq!(ids(&result), vec!["d2", "d3"]);
    }

    #[test]
    fn test_search_with_filter() {
        let engine = IndexEngine::new();
        engine
            .upsert(doc("a", "fast car").with_field("kind", FieldValue::Text("sports".into())))
            .unwrap();
        engine
            .upsert(doc("b", "fast food").with_field("kind", FieldValue::Text("food".into())))
            .unwrap();

        let filter = FilterClause {
            must: vec![FilterCondition {
                field: "kind".into(),
                op: FilterOperator::Eq,
                value: Some(json!("sports")),
                values: None,
            }],
            must_not: vec![],
        };
        let with_query = SearchRequest {
            filter: Some(filter.clone()),
            ..SearchRequest::text("fast")
        };
        assert_eq!(ids(&engine.search(&with_query).unwrap()), vec!["a"]);

        let filter_only = SearchRequest {
            filter: Some(filter),
            ..SearchRequest::default()
        };
        let result = engine.search(&filter_only).unwrap();
        assert_eq!(ids(&result), vec!["a"]);
        assert_eq!(result.hits[0].score, 0.0);
    }

    #[test]
    fn test_empty_query_matches_all() {
        let engine = IndexEngine::new();
        for id in ["c", "a", "b"] {
            engine.upsert(doc(id, "anything")).unwrap();
        }
        let result = engine.search(&SearchRequest::default()).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(ids(&result), vec!["a", "b", "c"]);
        assert!(result.hits.iter().all(|h| h.score == 0.0));

        let page = SearchRequest {
            size: 1,
            from: 1,
            ..SearchRequest::text("  ")
        };
        assert_eq!(ids(&engine.search(&page).unwrap()), vec!["b"]);
    }

    #[test]
    fn test_search_invalid_request() {
        let engine = IndexEngine::new();
        let req = SearchRequest {
            size: 0,
            ..SearchRequest::text("anything")
        };
        assert!(matches!(
            engine.search(&req),
            Err(EngineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_stats() {
        let engine = IndexEngine::new();
        engine.upsert(doc("a", "one two")).unwrap();
        engine.upsert(doc("b", "two three four five")).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.term_count, 5);
        assert!((stats.average_document_length - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_export_is_deterministic() {
        let first = IndexEngine::new();
        first.upsert(doc("b", "beta")).unwrap();
        first.upsert(doc("a", "alpha")).unwrap();

        let second = IndexEngine::new();
        second.upsert(doc("a", "stale")).unwrap();
        second.upsert(doc("b", "beta")).unwrap();
        second.upsert(doc("a", "alpha")).unwrap();

        assert_eq!(first.export().unwrap(), second.export().unwrap());
        assert_eq!(first.checksum().unwrap(), second.checksum().unwrap());
    }

    #[test]
    fn test_import_replaces_content() {
        let source = IndexEngine::new();
        source.upsert(doc("a", "alpha")).unwrap();
        source.upsert(doc("b", "beta")).unwrap();
        let bytes = source.export().unwrap();

        let target = IndexEngine::new();
        target.upsert(doc("zzz", "to be dropped")).unwrap();
        assert_eq!(target.import(&bytes).unwrap(), 2);
        assert!(target.get("zzz").is_none());
        assert_eq!(target.search(&SearchRequest::text("beta")).unwrap().total, 1);
        assert_eq!(target.export().unwrap(), bytes);
        target.validate().unwrap();
    }

    #[test]
    fn test_import_corrupt_leaves_engine_unchanged() {
        let engine = IndexEngine::new();
        engine.upsert(doc("keep", "me")).unwrap();
        let mut bytes = engine.export().unwrap();
        bytes[0] ^= 0x55;
        assert!(matches!(engine.import(&bytes), Err(EngineError::Corrupt(_))));
        assert!(engine.get("keep").is_some());
    }
}
