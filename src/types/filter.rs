use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured filter - either field conditions or a logical combination.
///
/// Follows MongoDB filter syntax so stored rule conditions and list queries
/// share one representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructuredFilter {
  /// Logical operators: { "$and": [...], "$or": [...], "$not": {...} }
  Logical(LogicalFilter),
  /// Field conditions: { "value": { "$gt": 21 }, "status": "open" }
  Fields(BTreeMap<String, FieldCondition>),
}

/// Logical operators for combining filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalFilter {
  #[serde(rename = "$and")]
  And(Vec<StructuredFilter>),
  #[serde(rename = "$or")]
  Or(Vec<StructuredFilter>),
  #[serde(rename = "$not")]
  Not(Box<StructuredFilter>),
}

/// Condition on a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldCondition {
  /// Operator-based: { "$gt": 21 }
  Operator(FilterOperator),
  /// Direct equality: "open" (shorthand for { "$eq": "open" })
  Value(serde_json::Value),
}

/// Filter operators matching MongoDB-style syntax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOperator {
  #[serde(rename = "$eq")]
  Eq(serde_json::Value),
  #[serde(rename = "$ne")]
  Ne(serde_json::Value),
  #[serde(rename = "$gt")]
  Gt(serde_json::Value),
  #[serde(rename = "$gte")]
  Gte(serde_json::Value),
  #[serde(rename = "$lt")]
  Lt(serde_json::Value),
  #[serde(rename = "$lte")]
  Lte(serde_json::Value),
  #[serde(rename = "$in")]
  In(Vec<serde_json::Value>),
  #[serde(rename = "$nin")]
  NotIn(Vec<serde_json::Value>),
  #[serde(rename = "$contains")]
  Contains(String),
  #[serde(rename = "$startsWith")]
  StartsWith(String),
  #[serde(rename = "$endsWith")]
  EndsWith(String),
  #[serde(rename = "$exists")]
  Exists(bool),
}

impl StructuredFilter {
  /// Single-field equality filter.
  pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
    let mut fields = BTreeMap::new();
    fields.insert(field.into(), FieldCondition::Value(value.into()));
    Self::Fields(fields)
  }

  /// Conjunction that skips the wrapper when only one operand is present.
  pub fn all(mut filters: Vec<StructuredFilter>) -> Self {
    if filters.len() == 1 {
      filters.remove(0)
    } else {
      Self::Logical(LogicalFilter::And(filters))
    }
  }
}
