//! Field filtering for search queries.
//!
//! A [`FilterClause`] has `must` (AND) and `must_not` (AND-NOT) conditions with
//! operators `eq`, `ne`, `gt`, `lt`, `gte`, `lte`, `in`, `exists`. Condition
//! values are plain JSON, compared against the document's typed fields. A list
//! field matches when any of its elements matches.

use crate::document::FieldValue;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Filter clause with `must` (AND) and `must_not` (AND-NOT) conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(default)]
    pub must: Vec<FilterCondition>,
    #[serde(default)]
    pub must_not: Vec<FilterCondition>,
}

/// A single condition on a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<serde_json::Value>>,
}

/// Comparison operator for filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Exists,
}

impl FilterClause {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Rejects conditions that could never be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.must
            .iter()
            .chain(self.must_not.iter())
            .try_for_each(FilterCondition::validate)
    }
}

impl FilterCondition {
    fn validate(&self) -> Result<(), EngineError> {
        if self.field.is_empty() {
            return Err(EngineError::InvalidQuery("filter field is empty".into()));
        }
        match self.op {
            FilterOperator::In if self.values.is_none() => Err(EngineError::InvalidQuery(
                format!("'in' filter on '{}' needs 'values'", self.field),
            )),
            FilterOperator::Exists | FilterOperator::In => Ok(()),
            _ if self.value.is_none() => Err(EngineError::InvalidQuery(format!(
                "filter on '{}' needs a 'value'",
                self.field
            ))),
            _ => Ok(()),
        }
    }
}

/// Checks a document's fields against a filter clause.
pub fn matches_filter(fields: &BTreeMap<String, FieldValue>, filter: &FilterClause) -> bool {
    filter.must.iter().all(|c| evaluate(fields, c))
        && !filter.must_not.iter().any(|c| evaluate(fields, c))
}

fn evaluate(fields: &BTreeMap<String, FieldValue>, cond: &FilterCondition) -> bool {
    let Some(field) = fields.get(&cond.field) else {
        return false;
    };
    match field {
        FieldValue::List(items) => items.iter().any(|item| evaluate_scalar(item, cond)),
        scalar => evaluate_scalar(scalar, cond),
    }
}

fn evaluate_scalar(field: &FieldValue, cond: &FilterCondition) -> bool {
    let value = cond.value.as_ref();
    match cond.op {
        FilterOperator::Exists => true,
        FilterOperator::Eq => value.is_some_and(|v| json_eq(field, v)),
        FilterOperator::Ne => value.is_some_and(|v| !json_eq(field, v)),
        FilterOperator::Gt => ordering(field, value).is_some_and(|o| o == Ordering::Greater),
        FilterOperator::Lt => ordering(field, value).is_some_and(|o| o == Ordering::Less),
        FilterOperator::Gte => ordering(field, value).is_some_and(|o| o != Ordering::Less),
        FilterOperator::Lte => ordering(field, value).is_some_and(|o| o != Ordering::Greater),
        FilterOperator::In => cond
            .values
            .as_ref()
            .is_some_and(|vals| vals.iter().any(|v| json_eq(field, v))),
    }
}

fn json_eq(field: &FieldValue, json: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (field, json) {
        (FieldValue::Text(s), Value::String(js)) => s == js,
        (FieldValue::Boolean(b), Value::Bool(jb)) => b == jb,
        (FieldValue::Integer(i), Value::Number(n)) => match n.as_i64() {
            Some(ni) => *i == ni,
            None => n.as_f64() == Some(*i as f64),
        },
        (FieldValue::Float(f), Value::Number(n)) => n.as_f64() == Some(*f),
        _ => false,
    }
}

/// Numbers compare numerically, text compares lexicographically.
fn ordering(field: &FieldValue, json: Option<&serde_json::Value>) -> Option<Ordering> {
    let json = json?;
    match field {
        FieldValue::Integer(i) => match json.as_i64() {
            Some(j) => Some(i.cmp(&j)),
            None => (*i as f64).partial_cmp(&json.as_f64()?),
        },
        FieldValue::Float(f) => f.partial_cmp(&json.as_f64()?),
        FieldValue::Text(s) => Some(s.as_str().cmp(json.as_str()?)),
        _ => None,
    }
}
