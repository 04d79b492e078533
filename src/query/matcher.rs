//! In-memory evaluation of structured filters against JSON records.
//!
//! Mirrors the SQL produced by [`StructuredCompiler`](super::StructuredCompiler)
//! so a stored condition means the same thing whether it is run as a query or
//! checked against a single changed record.

use std::cmp::Ordering;

use serde_json::Value;

use crate::types::{FieldCondition, FilterOperator, LogicalFilter, StructuredFilter};

/// Resolve a dotted path (`funnel.stage`) inside a JSON value.
pub fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .try_fold(record, |current, segment| match current {
      Value::Object(map) => map.get(segment),
      Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    })
    .filter(|v| !v.is_null())
}

/// Whether `record` satisfies `filter`.
pub fn matches(filter: &StructuredFilter, record: &Value) -> bool {
  match filter {
    StructuredFilter::Logical(LogicalFilter::And(filters)) => {
      filters.iter().all(|f| matches(f, record))
    }
    StructuredFilter::Logical(LogicalFilter::Or(filters)) => {
      filters.iter().any(|f| matches(f, record))
    }
    StructuredFilter::Logical(LogicalFilter::Not(inner)) => !matches(inner, record),
    StructuredFilter::Fields(fields) => fields
      .iter()
      .all(|(field, cond)| condition_holds(lookup(record, field), cond)),
  }
}

fn condition_holds(actual: Option<&Value>, condition: &FieldCondition) -> bool {
  match condition {
    FieldCondition::Value(expected) => equals(actual, expected),
    FieldCondition::Operator(op) => operator_holds(actual, op),
  }
}

fn operator_holds(actual: Option<&Value>, op: &FilterOperator) -> bool {
  match op {
    FilterOperator::Eq(v) => equals(actual, v),
    FilterOperator::Ne(v) => !equals(actual, v),
    FilterOperator::Gt(v) => compare(actual, v) == Some(Ordering::Greater),
    FilterOperator::Gte(v) => matches!(
      compare(actual, v),
      Some(Ordering::Greater | Ordering::Equal)
    ),
    FilterOperator::Lt(v) => compare(actual, v) == Some(Ordering::Less),
    FilterOperator::Lte(v) => {
      matches!(compare(actual, v), Some(Ordering::Less | Ordering::Equal))
    }
    FilterOperator::In(values) => values.iter().any(|v| equals(actual, v)),
    FilterOperator::NotIn(values) => !values.iter().any(|v| equals(actual, v)),
    FilterOperator::Contains(s) => text(actual).is_some_and(|t| t.contains(&s.to_lowercase())),
    FilterOperator::StartsWith(s) => {
      text(actual).is_some_and(|t| t.starts_with(&s.to_lowercase()))
    }
    FilterOperator::EndsWith(s) => text(actual).is_some_and(|t| t.ends_with(&s.to_lowercase())),
    FilterOperator::Exists(exists) => actual.is_some() == *exists,
  }
}

/// Null matches a missing field; numbers compare by value (1 == 1.0).
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
  match (actual, expected) {
    (None, Value::Null) => true,
    (None, _) => false,
    (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
    (Some(a), b) => a == b,
  }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
  match (actual?, expected) {
    (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
    _ => None,
  }
}

/// Unicode-lowercased text projection, matching the folded SQL LIKE.
fn text(actual: Option<&Value>) -> Option<String> {
  match actual? {
    Value::String(s) => Some(s.to_lowercase()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn filter(v: Value) -> StructuredFilter {
    serde_json::from_value(v).unwrap()
  }

  fn opportunity() -> Value {
    json!({
      "_id": "opp-1",
      "name": "Usina Fazenda Boa Vista",
      "status": "open",
      "value": 48000,
      "funnel": {"id": "f1", "stage": "negotiation"},
      "responsibles": [{"id": "u1", "name": "Ana"}],
      "wonAt": null
    })
  }

  #[test]
  fn lookup_nested_and_indexed() {
    let record = opportunity();
    assert_eq!(lookup(&record, "funnel.stage"), Some(&json!("negotiation")));
    assert_eq!(lookup(&record, "responsibles.0.name"), Some(&json!("Ana")));
    assert_eq!(lookup(&record, "funnel.missing"), None);
    assert_eq!(lookup(&record, "wonAt"), None);
  }

  #[test]
  fn shorthand_equality() {
    assert!(matches(&filter(json!({"status": "open"})), &opportunity()));
    assert!(!matches(&filter(json!({"status": "won"})), &opportunity()));
    assert!(matches(&filter(json!({"value": 48000.0})), &opportunity()));
  }

  #[test]
  fn null_matches_missing() {
    assert!(matches(&filter(json!({"wonAt": null})), &opportunity()));
    assert!(matches(&filter(json!({"lostAt": null})), &opportunity()));
    assert!(matches(&filter(json!({"lostAt": {"$exists": false}})), &opportunity()));
    assert!(matches(&filter(json!({"name": {"$exists": true}})), &opportunity()));
  }

  #[test]
  fn numeric_and_text_ordering() {
    let record = opportunity();
    assert!(matches(&filter(json!({"value": {"$gt": 10000}})), &record));
    assert!(matches(&filter(json!({"value": {"$lte": 48000}})), &record));
    assert!(!matches(&filter(json!({"value": {"$lt": 48000}})), &record));
    assert!(matches(&filter(json!({"name": {"$gte": "Usina"}})), &record));
    // Mixed types never compare
    assert!(!matches(&filter(json!({"value": {"$gt": "1"}})), &record));
  }

  #[test]
  fn ne_and_nin_include_missing() {
    let record = opportunity();
    assert!(matches(&filter(json!({"lossReason": {"$ne": "price"}})), &record));
    assert!(matches(&filter(json!({"lossReason": {"$nin": ["price"]}})), &record));
    assert!(!matches(&filter(json!({"status": {"$nin": ["open", "won"]}})), &record));
  }

  #[test]
  fn string_operators_ignore_case() {
    let record = opportunity();
    assert!(matches(&filter(json!({"name": {"$contains": "fazenda"}})), &record));
    assert!(matches(&filter(json!({"name": {"$startsWith": "USINA"}})), &record));
    assert!(matches(&filter(json!({"name": {"$endsWith": "vista"}})), &record));
    assert!(!matches(&filter(json!({"status": {"$contains": "x"}})), &record));

    let client = json!({"name": "JOÃO DA CONCEIÇÃO"});
    assert!(matches(&filter(json!({"name": {"$contains": "joão"}})), &client));
    assert!(matches(&filter(json!({"name": {"$endsWith": "Conceição"}})), &client));
  }

  #[test]
  fn not_passes_missing_fields() {
    let record = opportunity();
    assert!(matches(&filter(json!({"$not": {"lossReason": "price"}})), &record));
    assert!(matches(&filter(json!({"$not": {"value": {"$gt": "text"}}})), &record));
  }

  #[test]
  fn logical_combinations() {
    let record = opportunity();
    let f = filter(json!({
      "$or": [
        {"status": "won"},
        {"$and": [{"funnel.stage": "negotiation"}, {"value": {"$gte": 40000}}]}
      ]
    }));
    assert!(matches(&f, &record));
    assert!(!matches(&filter(json!({"$not": {"status": "open"}})), &record));
  }
}
