//! Per-entity payload validation.
//!
//! Documents stay loosely typed JSON: each kind declares the fields it knows
//! about and their shapes, anything else passes through untouched.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use super::error::ValidationError;
use super::kind::EntityKind;
use crate::automation::AutomationRule;

/// Partner key carried by every scoped document.
pub const PARTNER_FIELD: &str = "idParceiro";
pub const INSERTED_AT: &str = "insertedAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const ID_FIELD: &str = "_id";
/// Stamped by automation writes: `{automationId, depth, writeId}`.
pub const AUTOMATION_MARK: &str = "automatedBy";

pub const OPPORTUNITY_STATUSES: &[&str] = &["open", "won", "lost"];
const EXECUTION_STATUSES: &[&str] = &["success", "failure", "skipped"];

#[derive(Debug, Clone, Copy)]
pub enum FieldType {
  Text,
  Number { min: Option<f64> },
  Bool,
  Object,
  /// RFC 3339 timestamp or plain `YYYY-MM-DD` date
  Timestamp,
  OneOf(&'static [&'static str]),
  List,
  ListOf(&'static [FieldSpec]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
  pub name: &'static str,
  pub ty: FieldType,
  pub required: bool,
}

const fn req(name: &'static str, ty: FieldType) -> FieldSpec {
  FieldSpec {
    name,
    ty,
    required: true,
  }
}

const fn opt(name: &'static str, ty: FieldType) -> FieldSpec {
  FieldSpec {
    name,
    ty,
    required: false,
  }
}

const NON_NEGATIVE: FieldType = FieldType::Number { min: Some(0.0) };
const NUMBER: FieldType = FieldType::Number { min: None };

const PERSON: &[FieldSpec] = &[req("id", FieldType::Text), opt("name", FieldType::Text)];

const INSTALLMENT: &[FieldSpec] = &[
  req("value", NON_NEGATIVE),
  opt("dueDate", FieldType::Timestamp),
  opt("paid", FieldType::Bool),
  opt("paidAt", FieldType::Timestamp),
];

const PROPOSAL_ITEM: &[FieldSpec] = &[
  req("description", FieldType::Text),
  opt("quantity", NON_NEGATIVE),
  opt("unitPrice", NON_NEGATIVE),
];

const PARTNER: &[FieldSpec] = &[
  req("name", FieldType::Text),
  opt("document", FieldType::Text),
  opt("email", FieldType::Text),
  opt("phone", FieldType::Text),
  opt("address", FieldType::Object),
  opt("active", FieldType::Bool),
];

const CLIENT: &[FieldSpec] = &[
  req("name", FieldType::Text),
  opt("cpfCnpj", FieldType::Text),
  opt("email", FieldType::Text),
  opt("phone", FieldType::Text),
  opt("address", FieldType::Object),
  opt("acquisitionChannel", FieldType::Text),
  opt("responsibleId", FieldType::Text),
];

const OPPORTUNITY: &[FieldSpec] = &[
  req("name", FieldType::Text),
  req("clientId", FieldType::Text),
  opt("type", FieldType::Text),
  opt("funnel", FieldType::Object),
  opt("status", FieldType::OneOf(OPPORTUNITY_STATUSES)),
  opt("responsibles", FieldType::ListOf(PERSON)),
  opt("winningProposalId", FieldType::Text),
  opt("wonAt", FieldType::Timestamp),
  opt("lostAt", FieldType::Timestamp),
  opt("lossReason", FieldType::Text),
  opt("projectId", FieldType::Text),
  opt("address", FieldType::Object),
];

const PROPOSAL: &[FieldSpec] = &[
  req("name", FieldType::Text),
  req("opportunityId", FieldType::Text),
  opt("value", NON_NEGATIVE),
  opt("power", NON_NEGATIVE),
  opt("items", FieldType::ListOf(PROPOSAL_ITEM)),
];

const PROJECT: &[FieldSpec] = &[
  req("name", FieldType::Text),
  req("clientId", FieldType::Text),
  opt("opportunityId", FieldType::Text),
  opt("proposalId", FieldType::Text),
  opt("status", FieldType::Text),
  opt("responsibles", FieldType::ListOf(PERSON)),
  opt("value", NON_NEGATIVE),
];

const REVENUE: &[FieldSpec] = &[
  req("description", FieldType::Text),
  req("total", NON_NEGATIVE),
  opt("projectId", FieldType::Text),
  opt("category", FieldType::Text),
  opt("receipts", FieldType::ListOf(INSTALLMENT)),
];

const EXPENSE: &[FieldSpec] = &[
  req("description", FieldType::Text),
  req("total", NON_NEGATIVE),
  opt("projectId", FieldType::Text),
  opt("category", FieldType::Text),
  opt("supplier", FieldType::Object),
  opt("payments", FieldType::ListOf(INSTALLMENT)),
];

const SERVICE_ORDER: &[FieldSpec] = &[
  req("category", FieldType::Text),
  req("description", FieldType::Text),
  opt("projectId", FieldType::Text),
  opt("clientId", FieldType::Text),
  opt("status", FieldType::Text),
  opt("scheduledAt", FieldType::Timestamp),
  opt("responsibleId", FieldType::Text),
  opt("materials", FieldType::List),
];

const ACTIVITY: &[FieldSpec] = &[
  req("title", FieldType::Text),
  opt("description", FieldType::Text),
  opt("dueDate", FieldType::Timestamp),
  opt("responsibles", FieldType::ListOf(PERSON)),
  opt("opportunityId", FieldType::Text),
  opt("projectId", FieldType::Text),
  opt("concludedAt", FieldType::Timestamp),
];

const NOTIFICATION: &[FieldSpec] = &[
  req("message", FieldType::Text),
  opt("recipients", FieldType::ListOf(PERSON)),
  opt("reference", FieldType::Object),
  opt("readAt", FieldType::Timestamp),
  opt("automationId", FieldType::Text),
];

const AUTOMATION: &[FieldSpec] = &[
  req("title", FieldType::Text),
  opt("active", FieldType::Bool),
  req("trigger", FieldType::Object),
  opt("condition", FieldType::Object),
  req("action", FieldType::Object),
];

const AUTOMATION_EXECUTION: &[FieldSpec] = &[
  req("automationId", FieldType::Text),
  req("entity", FieldType::Text),
  req("entityId", FieldType::Text),
  req("action", FieldType::Text),
  req("status", FieldType::OneOf(EXECUTION_STATUSES)),
  opt("error", FieldType::Text),
  req("executedAt", FieldType::Timestamp),
];

pub fn fields(kind: EntityKind) -> &'static [FieldSpec] {
  match kind {
    EntityKind::Partners => PARTNER,
    EntityKind::Clients => CLIENT,
    EntityKind::Opportunities => OPPORTUNITY,
    EntityKind::Proposals => PROPOSAL,
    EntityKind::Projects => PROJECT,
    EntityKind::Revenues => REVENUE,
    EntityKind::Expenses => EXPENSE,
    EntityKind::ServiceOrders => SERVICE_ORDER,
    EntityKind::Activities => ACTIVITY,
    EntityKind::Notifications => NOTIFICATION,
    EntityKind::Automations => AUTOMATION,
    EntityKind::AutomationExecutions => AUTOMATION_EXECUTION,
  }
}

/// Validate a full document body for `kind`, filling per-kind defaults.
pub fn validate(kind: EntityKind, mut data: Value) -> Result<Value, ValidationError> {
  let Value::Object(map) = &mut data else {
    return Err(ValidationError::new("body", "must be a JSON object"));
  };

  apply_defaults(kind, map);
  check_fields(fields(kind), map, "")?;

  if kind == EntityKind::Automations {
    let rule: AutomationRule = serde_json::from_value(Value::Object(map.clone()))
      .map_err(|e| ValidationError::new("automation", e.to_string()))?;
    rule.validate()?;
  }

  Ok(data)
}

fn apply_defaults(kind: EntityKind, map: &mut Map<String, Value>) {
  let (field, value) = match kind {
    EntityKind::Opportunities => ("status", Value::String("open".into())),
    EntityKind::Automations | EntityKind::Partners => ("active", Value::Bool(true)),
    _ => return,
  };
  if map.get(field).map_or(true, Value::is_null) {
    map.insert(field.to_string(), value);
  }
}

fn check_fields(
  specs: &[FieldSpec],
  map: &Map<String, Value>,
  prefix: &str,
) -> Result<(), ValidationError> {
  for spec in specs {
    let path = format!("{}{}", prefix, spec.name);
    match map.get(spec.name) {
      None | Some(Value::Null) if spec.required => {
        return Err(ValidationError::new(path, "is required"));
      }
      None | Some(Value::Null) => {}
      Some(value) => check_value(spec, value, &path)?,
    }
  }
  Ok(())
}

fn check_value(spec: &FieldSpec, value: &Value, path: &str) -> Result<(), ValidationError> {
  match (spec.ty, value) {
    (FieldType::Text, Value::String(s)) => {
      if spec.required && s.trim().is_empty() {
        return Err(ValidationError::new(path, "must not be empty"));
      }
      Ok(())
    }
    (FieldType::Text, _) => Err(ValidationError::new(path, "must be a string")),
    (FieldType::Number { min }, Value::Number(n)) => {
      let v = n.as_f64().unwrap_or(f64::NAN);
      match min {
        Some(min) if v < min => Err(ValidationError::new(
          path,
          format!("must be greater than or equal to {}", min),
        )),
        _ => Ok(()),
      }
    }
    (FieldType::Number { .. }, _) => Err(ValidationError::new(path, "must be a number")),
    (FieldType::Bool, Value::Bool(_)) => Ok(()),
    (FieldType::Bool, _) => Err(ValidationError::new(path, "must be a boolean")),
    (FieldType::Object, Value::Object(_)) => Ok(()),
    (FieldType::Object, _) => Err(ValidationError::new(path, "must be an object")),
    (FieldType::Timestamp, Value::String(s)) if is_timestamp(s) => Ok(()),
    (FieldType::Timestamp, _) => Err(ValidationError::new(
      path,
      "must be an ISO-8601 date or timestamp",
    )),
    (FieldType::OneOf(allowed), Value::String(s)) if allowed.contains(&s.as_str()) => Ok(()),
    (FieldType::OneOf(allowed), _) => Err(ValidationError::new(
      path,
      format!("must be one of: {}", allowed.join(", ")),
    )),
    (FieldType::List, Value::Array(_)) => Ok(()),
    (FieldType::ListOf(item_specs), Value::Array(items)) => {
      for (i, item) in items.iter().enumerate() {
        let item_path = format!("{}[{}]", path, i);
        let Value::Object(item_map) = item else {
          return Err(ValidationError::new(item_path, "must be an object"));
        };
        check_fields(item_specs, item_map, &format!("{}.", item_path))?;
      }
      Ok(())
    }
    (FieldType::List | FieldType::ListOf(_), _) => {
      Err(ValidationError::new(path, "must be an array"))
    }
  }
}

fn is_timestamp(s: &str) -> bool {
  DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn required_field_is_named() {
    let err = validate(EntityKind::Clients, json!({"email": "a@b.com"})).unwrap_err();
    assert_eq!(err.field, "name");

    let err = validate(EntityKind::Opportunities, json!({"name": "Usina"})).unwrap_err();
    assert_eq!(err.field, "clientId");
  }

  #[test]
  fn blank_required_text_is_rejected() {
    let err = validate(EntityKind::Clients, json!({"name": "   "})).unwrap_err();
    assert_eq!(err.field, "name");
    assert_eq!(err.message, "must not be empty");
  }

  #[test]
  fn negative_amounts_are_rejected() {
    let err = validate(
      EntityKind::Proposals,
      json!({"name": "P1", "opportunityId": "o1", "value": -10}),
    )
    .unwrap_err();
    assert_eq!(err.field, "value");
  }

  #[test]
  fn nested_list_items_are_checked() {
    let err = validate(
      EntityKind::Revenues,
      json!({
        "description": "Entrada",
        "total": 1000,
        "receipts": [{"value": 500}, {"value": "x"}]
      }),
    )
    .unwrap_err();
    assert_eq!(err.field, "receipts[1].value");
  }

  #[test]
  fn opportunity_defaults_to_open() {
    let data = validate(
      EntityKind::Opportunities,
      json!({"name": "Usina", "clientId": "c1"}),
    )
    .unwrap();
    assert_eq!(data["status"], "open");

    let err = validate(
      EntityKind::Opportunities,
      json!({"name": "Usina", "clientId": "c1", "status": "pending"}),
    )
    .unwrap_err();
    assert_eq!(err.field, "status");
  }

  #[test]
  fn unknown_fields_pass_through() {
    let data = validate(
      EntityKind::Clients,
      json!({"name": "Maria", "notes": {"source": "fair"}}),
    )
    .unwrap();
    assert_eq!(data["notes"]["source"], "fair");
  }

  #[test]
  fn timestamps_accept_dates_and_rfc3339() {
    assert!(is_timestamp("2024-05-01"));
    assert!(is_timestamp("2024-05-01T10:00:00Z"));
    assert!(is_timestamp("2024-05-01T10:00:00.123-03:00"));
    assert!(!is_timestamp("01/05/2024"));
  }

  #[test]
  fn automation_rule_shape_is_checked() {
    let err = validate(
      EntityKind::Automations,
      json!({
        "title": "Bad",
        "trigger": {"entity": "projects", "event": {"type": "exploded"}},
        "action": {"type": "createNotification", "message": "x", "recipients": "responsibles"}
      }),
    )
    .unwrap_err();
    assert_eq!(err.field, "automation");

    let ok = validate(
      EntityKind::Automations,
      json!({
        "title": "Won",
        "trigger": {"entity": "opportunities", "event": {"type": "fieldChanged", "field": "status", "to": "won"}},
        "action": {"type": "createNotification", "message": "{{name}} won", "recipients": "responsibles"}
      }),
    )
    .unwrap();
    assert_eq!(ok["active"], true);
  }
}
