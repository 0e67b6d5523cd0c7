//! Core document types for Lodestone.
//!
//! A [`Document`] is an application-supplied id plus a map of typed fields.
//! Text values are analyzed for BM25; every value can be used in filters.
//! Fields are kept in a `BTreeMap` so iteration order, and therefore both the
//! indexed token stream and the serialized bytes, are identical on every node.

use crate::config;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed field value.
///
/// Uses the default externally-tagged serde representation so it round-trips
/// through bincode snapshots. The server converts to/from plain JSON at the
/// HTTP boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number. Must be finite.
    Float(f64),
    /// UTF-8 text, tokenized and indexed for BM25.
    Text(String),
    /// A flat list of scalar values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    fn is_scalar(&self) -> bool {
        !matches!(self, FieldValue::List(_))
    }

    fn text_len(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.len(),
            FieldValue::List(items) => items.iter().map(FieldValue::text_len).sum(),
            _ => 0,
        }
    }

    fn push_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FieldValue::Text(s) => out.push(s),
            FieldValue::List(items) => items.iter().for_each(|item| item.push_text(out)),
            _ => {}
        }
    }
}

/// A stored document: unique id plus typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Application-supplied identifier, unique within the index.
    pub id: String,
    /// Named field values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Creates a document from an id and its fields.
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Builder-style helper that sets one field.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// All text values of the document joined by newlines, in field-name order.
    /// This is what the inverted index sees.
    pub fn searchable_text(&self) -> String {
        let mut parts = Vec::new();
        for value in self.fields.values() {
            value.push_text(&mut parts);
        }
        parts.join("\n")
    }

    /// Validates the document against the engine's limits.
    ///
    /// Called before a document is proposed to the log and again when it is
    /// applied, so a malformed document never reaches the index.
    pub fn validate(&self) -> Result<(), EngineError> {
        validate_id(&self.id)?;
        if self.fields.len() > config::MAX_FIELDS {
            return Err(EngineError::InvalidDocument(format!(
                "document has {} fields, maximum is {}",
                self.fields.len(),
                config::MAX_FIELDS
            )));
        }
        let mut text_len = 0usize;
        for (name, value) in &self.fields {
            if name.is_empty() || name.len() > config::MAX_FIELD_NAME_LEN {
                return Err(EngineError::InvalidDocument(format!(
                    "field name must be 1..={} bytes",
                    config::MAX_FIELD_NAME_LEN
                )));
            }
            validate_value(name, value)?;
            text_len += value.text_len();
        }
        if text_len > config::MAX_TEXT_LEN {
            return Err(EngineError::InvalidDocument(format!(
                "document text is {} bytes, maximum is {}",
                text_len,
                config::MAX_TEXT_LEN
            )));
        }
        Ok(())
    }
}

fn validate_value(name: &str, value: &FieldValue) -> Result<(), EngineError> {
    match value {
        FieldValue::Float(f) if !f.is_finite() => Err(EngineError::InvalidDocument(format!(
            "field '{name}' is not a finite number"
        ))),
        FieldValue::List(items) => {
            if items.len() > config::MAX_LIST_LEN {
                return Err(EngineError::InvalidDocument(format!(
                    "field '{name}' has {} elements, maximum is {}",
                    items.len(),
                    config::MAX_LIST_LEN
                )));
            }
            for item in items {
                if !item.is_scalar() {
                    return Err(EngineError::InvalidDocument(format!(
                        "field '{name}' contains a nested list"
                    )));
                }
                validate_value(name, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validates a document id: non-empty, bounded, no control characters.
pub fn validate_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() {
        return Err(EngineError::InvalidDocument("document id is empty".into()));
    }
    if id.len() > config::MAX_DOC_ID_LEN {
        return Err(EngineError::InvalidDocument(format!(
            "document id is {} bytes, maximum is {}",
            id.len(),
            config::MAX_DOC_ID_LEN
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(EngineError::InvalidDocument(
            "document id contains control characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new("doc-1", BTreeMap::new())
            .with_field("title", FieldValue::Text("Raft consensus".into()))
            .with_field("body", FieldValue::Text("leader election".into()))
            .with_field("year", FieldValue::Integer(2014))
    }

    #[test]
    fn test_searchable_text_in_field_order() {
        // "body" sorts before "title"
        assert_eq!(doc().searchable_text(), "leader election\nRaft consensus");
    }

    #[test]
    fn test_searchable_text_includes_list_items() {
        let d = Document::new("x", BTreeMap::new()).with_field(
            "tags",
            FieldValue::List(vec![
                FieldValue::Text("alpha".into()),
                FieldValue::Integer(3),
                FieldValue::Text("beta".into()),
            ]),
        );
        assert_eq!(d.searchable_text(), "alpha\nbeta");
    }

    #[test]
    fn test_validate_ok() {
        assert!(doc().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_id() {
        let d = Document::new("", BTreeMap::new());
        assert!(matches!(d.validate(), Err(EngineError::InvalidDocument(_))));
    }

    #[test]
    fn test_validate_control_chars_in_id() {
        assert!(validate_id("bad\nid").is_err());
        assert!(validate_id("fine-id_01").is_ok());
    }

    #[test]
    fn test_validate_non_finite_float() {
        let d = doc().with_field("score", FieldValue::Float(f64::NAN));
        assert!(d.validate().is_err());
        let d = doc().with_field("score", FieldValue::Float(f64::INFINITY));
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_nested_list() {
        let d = doc().with_field(
            "nested",
            FieldValue::List(vec![FieldValue::List(vec![FieldValue::Integer(1)])]),
        );
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_too_much_text() {
        let d = doc().with_field("big", FieldValue::Text("a".repeat(config::MAX_TEXT_LEN + 1)));
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_validate_empty_field_name() {
        let d = doc().with_field("", FieldValue::Boolean(true));
        assert!(d.validate().is_err());
    }
}
