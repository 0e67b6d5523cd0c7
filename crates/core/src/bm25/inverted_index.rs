//! Inverted index for BM25 full-text search.
//!
//! Maps terms to postings lists (internal document id + term frequency).
//! Internal ids are dense `u32` slots assigned by the engine; the index keeps
//! each slot's term list so removal only touches the postings it appears in.

use crate::bm25::tokenizer::term_frequencies;
use std::collections::HashMap;

/// A single entry in a term's postings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// Internal document slot.
    pub doc_id: u32,
    /// Number of times the term appears in the document.
    pub term_frequency: u32,
}

/// Term → postings, plus the per-document lengths BM25 needs.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    postings: HashMap<String, Vec<Posting>>,
    /// Token count per slot; `None` for free slots.
    doc_lengths: Vec<Option<u32>>,
    /// Distinct terms per slot, for removal.
    doc_terms: Vec<Vec<String>>,
    doc_count: u32,
    total_doc_length: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `text` under `internal_id`. A slot that is already occupied is
    /// replaced.
    pub fn add_document(&mut self, internal_id: u32, text: &str) {
        self.remove_document(internal_id);

        let (frequencies, doc_len) = term_frequencies(text);
        let idx = internal_id as usize;
        if idx >= self.doc_lengths.len() {
            self.doc_lengths.resize(idx + 1, None);
            self.doc_terms.resize_with(idx + 1, Vec::new);
        }
        self.doc_lengths[idx] = Some(doc_len);
        self.doc_count += 1;
        self.total_doc_length += u64::from(doc_len);

        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, tf) in frequencies {
            self.postings.entry(term.clone()).or_default().push(Posting {
                doc_id: internal_id,
                term_frequency: tf,
            });
            terms.push(term);
        }
        self.doc_terms[idx] = terms;
    }

    /// Removes the document in `internal_id`. Returns `false` if the slot was free.
    pub fn remove_document(&mut self, internal_id: u32) -> bool {
        let idx = internal_id as usize;
        let Some(doc_len) = self.doc_lengths.get_mut(idx).and_then(Option::take) else {
            return false;
        };
        self.doc_count -= 1;
        self.total_doc_length -= u64::from(doc_len);

        for term in std::mem::take(&mut self.doc_terms[idx]) {
            if let Some(list) = self.postings.get_mut(&term) {
                list.retain(|p| p.doc_id != internal_id);
                if list.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    /// Postings for a term, if any document contains it.
    pub fn postings(&self, term: &str) -> Option<&[Posting]> {
        self.postings.get(term).map(Vec::as_slice)
    }

    /// Token count of the document in `internal_id`, or 0 for a free slot.
    pub fn doc_length(&self, internal_id: u32) -> u32 {
        self.doc_lengths
            .get(internal_id as usize)
            .copied()
            .flatten()
            .unwrap_or(0)
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Number of distinct terms in the index.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Average document length across indexed documents.
    pub fn average_doc_length(&self) -> f32 {
        if self.doc_count == 0 {
            return 0.0;
        }
        self.total_doc_length as f32 / self.doc_count as f32
    }
}
