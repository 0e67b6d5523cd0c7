//! Request and response data transfer objects for the REST API.
//!
//! Documents travel as plain JSON objects at the HTTP boundary and are
//! converted to typed [`FieldValue`]s here.

use crate::api::errors::ApiError;
use crate::cluster::NodeId;
use crate::coordinator::SnapshotInfo;
use lodestone_core::search::ScoredDocument;
use lodestone_core::{Document, FieldValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Converts one JSON value to a field value. `null`, objects, and nested
/// arrays have no field representation and are rejected.
pub fn json_to_field(name: &str, value: Value) -> Result<FieldValue, ApiError> {
    match value {
        Value::Bool(b) => Ok(FieldValue::Boolean(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(FieldValue::Integer(i)),
            None => n
                .as_f64()
                .map(FieldValue::Float)
                .ok_or_else(|| ApiError::BadRequest(format!("field '{name}' is not a valid number"))),
        },
        Value::String(s) => Ok(FieldValue::Text(s)),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(_) => Err(ApiError::BadRequest(format!(
                    "field '{name}' contains a nested array"
                ))),
                other => json_to_field(name, other),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FieldValue::List),
        Value::Null => Err(ApiError::BadRequest(format!("field '{name}' is null"))),
        Value::Object(_) => Err(ApiError::BadRequest(format!(
            "field '{name}' is an object; only scalars and arrays are supported"
        ))),
    }
}

pub fn field_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Boolean(b) => Value::Bool(*b),
        FieldValue::Integer(i) => serde_json::json!(*i),
        FieldValue::Float(f) => serde_json::json!(*f),
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::List(items) => Value::Array(items.iter().map(field_to_json).collect()),
    }
}

/// Renders a document's fields, optionally restricted to `only`.
pub fn fields_to_json(document: &Document, only: Option<&[String]>) -> Map<String, Value> {
    document
        .fields
        .iter()
        .filter(|(name, _)| only.map_or(true, |names| names.iter().any(|n| n == *name)))
        .map(|(name, value)| (name.clone(), field_to_json(value)))
        .collect()
}

/// Request body for `PUT /documents` and each line of `POST /bulk/index`.
#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl DocumentRequest {
    pub fn into_document(self) -> Result<Document, ApiError> {
        let mut fields = BTreeMap::new();
        for (name, value) in self.fields {
            let field = json_to_field(&name, value)?;
            fields.insert(name, field);
        }
        Ok(Document::new(self.id, fields))
    }
}

/// Each line of `POST /bulk/delete`.
#[derive(Debug, Deserialize)]
pub struct DocumentRef {
    pub id: String,
}

/// Response for `GET /documents/:id`.
#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl From<&Document> for DocumentResponse {
    fn from(document: &Document) -> Self {
        Self {
            id: document.id.clone(),
            fields: fields_to_json(document, None),
        }
    }
}

/// Acknowledgement for single-document writes.
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub id: String,
    pub result: &'static str,
}

/// Response for the bulk endpoints. `error` is set when the stream was
/// abandoned; `count` items were committed before that.
#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub fields: Map<String, Value>,
}

impl SearchHit {
    pub fn from_scored(hit: &ScoredDocument, only: Option<&[String]>) -> Self {
        Self {
            id: hit.document.id.clone(),
            score: hit.score,
            fields: fields_to_json(&hit.document, only),
        }
    }
}

/// Response for `POST /search`.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total: usize,
    pub hits: Vec<SearchHit>,
    pub took_ms: u64,
}

/// Response for `POST /snapshot`. `snapshot` is null when nothing has been
/// applied yet.
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub snapshot: Option<SnapshotInfo>,
}

/// Response for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub node_id: NodeId,
    pub state: &'static str,
    pub leader: Option<NodeId>,
    pub documents: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_request_conversion() {
        let req: DocumentRequest = serde_json::from_value(json!({
            "id": "doc1",
            "fields": {
                "title": "Raft",
                "year": 2014,
                "rating": 4.5,
                "draft": false,
                "tags": ["consensus", 3]
            }
        }))
        .unwrap();
        let doc = req.into_document().unwrap();
        assert_eq!(doc.fields["title"], FieldValue::Text("Raft".into()));
        assert_eq!(doc.fields["year"], FieldValue::Integer(2014));
        assert_eq!(doc.fields["rating"], FieldValue::Float(4.5));
        assert_eq!(doc.fields["draft"], FieldValue::Boolean(false));
        assert_eq!(
            doc.fields["tags"],
            FieldValue::List(vec![
                FieldValue::Text("consensus".into()),
                FieldValue::Integer(3)
            ])
        );
    }

    #[test]
    fn test_unsupported_json_rejected() {
        assert!(json_to_field("a", Value::Null).is_err());
        assert!(json_to_field("a", json!({"nested": 1})).is_err());
        assert!(json_to_field("a", json!([[1, 2]])).is_err());
        assert!(json_to_field("a", json!([{"x": 1}])).is_err());
    }

    #[test]
    fn test_field_projection() {
        let doc = Document::new("d", BTreeMap::new())
            .with_field("a", FieldValue::Integer(1))
            .with_field("b", FieldValue::Text("x".into()));
        let all = fields_to_json(&doc, None);
        assert_eq!(all.len(), 2);
        let only = vec!["b".to_string()];
        let some = fields_to_json(&doc, Some(&only));
        assert_eq!(some.len(), 1);
        assert_eq!(some["b"], json!("x"));
    }
}
