use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::crm::{EntityKind, ValidationError};
use crate::types::{ChangeOperation, StructuredFilter};

/// A stored automation: when `trigger` fires and `condition` holds, run `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
  pub title: String,
  #[serde(default = "default_active")]
  pub active: bool,
  pub trigger: Trigger,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<StructuredFilter>,
  pub action: Action,
}

fn default_active() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
  pub entity: EntityKind,
  pub event: TriggerEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerEvent {
  Inserted,
  Updated,
  Deleted,
  /// An update where the value at `field` actually changed
  #[serde(rename_all = "camelCase")]
  FieldChanged {
    field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<Value>,
  },
}

impl TriggerEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Inserted => "inserted",
      Self::Updated => "updated",
      Self::Deleted => "deleted",
      Self::FieldChanged { .. } => "fieldChanged",
    }
  }

  /// Whether the event agrees with a change; `old`/`new` are the document bodies.
  pub fn fires(&self, operation: ChangeOperation, old: Option<&Value>, new: Option<&Value>) -> bool {
    match (self, operation) {
      (Self::Inserted, ChangeOperation::Insert) => true,
      (Self::Updated, ChangeOperation::Update) => true,
      (Self::Deleted, ChangeOperation::Delete) => true,
      (Self::FieldChanged { field, from, to }, ChangeOperation::Update) => {
        let before = old.and_then(|v| crate::query::lookup(v, field));
        let after = new.and_then(|v| crate::query::lookup(v, field));
        before != after
          && from.as_ref().map_or(true, |f| before == Some(f))
          && to.as_ref().map_or(true, |t| after == Some(t))
      }
      _ => false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
}

/// Who receives a notification or workflow: `"responsibles"` or `{"users": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecipientSource {
  /// The changed entity's `responsibles` list
  Responsibles,
  Users(Vec<Recipient>),
}

impl RecipientSource {
  pub fn resolve(&self, entity: &Value) -> Vec<Recipient> {
    match self {
      Self::Users(users) => users.clone(),
      Self::Responsibles => {
        let listed = entity
          .get("responsibles")
          .and_then(Value::as_array)
          .map(|items| {
            items
              .iter()
              .filter_map(|item| serde_json::from_value::<Recipient>(item.clone()).ok())
              .collect::<Vec<_>>()
          })
          .unwrap_or_default();
        if !listed.is_empty() {
          return listed;
        }
        entity
          .get("responsibleId")
          .and_then(Value::as_str)
          .map(|id| {
            vec![Recipient {
              id: id.to_string(),
              name: None,
            }]
          })
          .unwrap_or_default()
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelfTarget {
  #[serde(rename = "self")]
  Itself,
}

/// Document an `updateFields` action writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdateTarget {
  Itself(SelfTarget),
  /// The document whose id is stored in `related` on the changed entity
  Related { related: String, entity: EntityKind },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
  CreateNotification {
    message: String,
    recipients: RecipientSource,
  },
  UpdateFields {
    target: UpdateTarget,
    changes: Map<String, Value>,
  },
  TriggerWorkflow {
    workflow: String,
    recipients: RecipientSource,
  },
}

impl Action {
  pub fn name(&self) -> &'static str {
    match self {
      Self::CreateNotification { .. } => "createNotification",
      Self::UpdateFields { .. } => "updateFields",
      Self::TriggerWorkflow { .. } => "triggerWorkflow",
    }
  }
}

impl AutomationRule {
  /// Semantic checks serde cannot express.
  pub fn validate(&self) -> Result<(), ValidationError> {
    if !self.trigger.entity.automatable() {
      return Err(ValidationError::new(
        "trigger.entity",
        format!("{} changes cannot trigger automations", self.trigger.entity),
      ));
    }
    if let TriggerEvent::FieldChanged { field, .. } = &self.trigger.event {
      crate::db::validate_identifier(field)
        .map_err(|e| ValidationError::new("trigger.event.field", e.to_string()))?;
    }
    if let Some(condition) = &self.condition {
      crate::query::StructuredCompiler::default()
        .filter_to_sql(condition)
        .map_err(|e| ValidationError::new("condition", e.to_string()))?;
    }
    match &self.action {
      Action::CreateNotification { message, .. } if message.trim().is_empty() => {
        Err(ValidationError::new("action.message", "must not be empty"))
      }
      Action::UpdateFields { changes, .. } if changes.is_empty() => {
        Err(ValidationError::new("action.changes", "must not be empty"))
      }
      Action::UpdateFields {
        target: UpdateTarget::Related { entity, .. },
        ..
      } if !entity.partner_scoped() || *entity == EntityKind::AutomationExecutions => Err(
        ValidationError::new("action.target.entity", "cannot be updated by automations"),
      ),
      Action::TriggerWorkflow { workflow, .. } if workflow.trim().is_empty() => {
        Err(ValidationError::new("action.workflow", "must not be empty"))
      }
      _ => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn rule(v: Value) -> AutomationRule {
    serde_json::from_value(v).unwrap()
  }

  #[test]
  fn parse_full_rule() {
    let r = rule(json!({
      "title": "Notify on win",
      "trigger": {"entity": "opportunities", "event": {"type": "fieldChanged", "field": "status", "to": "won"}},
      "condition": {"value": {"$gte": 10000}},
      "action": {"type": "createNotification", "message": "{{name}} won", "recipients": "responsibles"}
    }));
    assert!(r.active);
    assert_eq!(r.trigger.entity, EntityKind::Opportunities);
    assert!(matches!(r.trigger.event, TriggerEvent::FieldChanged { ref field, .. } if field == "status"));
    assert!(r.condition.is_some());
    assert_eq!(r.action.name(), "createNotification");
  }

  #[test]
  fn parse_update_targets() {
    let own: UpdateTarget = serde_json::from_value(json!("self")).unwrap();
    assert_eq!(own, UpdateTarget::Itself(SelfTarget::Itself));

    let related: UpdateTarget =
      serde_json::from_value(json!({"related": "projectId", "entity": "projects"})).unwrap();
    assert_eq!(
      related,
      UpdateTarget::Related {
        related: "projectId".into(),
        entity: EntityKind::Projects
      }
    );
  }

  #[test]
  fn parse_recipient_sources() {
    let src: RecipientSource = serde_json::from_value(json!("responsibles")).unwrap();
    assert_eq!(src, RecipientSource::Responsibles);

    let src: RecipientSource =
      serde_json::from_value(json!({"users": [{"id": "u1", "name": "Ana"}]})).unwrap();
    assert_eq!(
      src.resolve(&json!({})),
      vec![Recipient {
        id: "u1".into(),
        name: Some("Ana".into())
      }]
    );
  }

  #[test]
  fn responsibles_fall_back_to_single_owner() {
    let src = RecipientSource::Responsibles;
    let listed = src.resolve(&json!({"responsibles": [{"id": "u1", "name": "Ana", "role": "seller"}]}));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "u1");

    let single = src.resolve(&json!({"responsibleId": "u9"}));
    assert_eq!(single[0].id, "u9");
    assert!(src.resolve(&json!({})).is_empty());
  }

  #[test]
  fn field_changed_requires_an_actual_change() {
    let event = TriggerEvent::FieldChanged {
      field: "status".into(),
      from: None,
      to: Some(json!("won")),
    };
    let open = json!({"status": "open"});
    let won = json!({"status": "won"});

    assert!(event.fires(ChangeOperation::Update, Some(&open), Some(&won)));
    assert!(!event.fires(ChangeOperation::Update, Some(&won), Some(&won)));
    assert!(!event.fires(ChangeOperation::Update, Some(&won), Some(&open)));
    assert!(!event.fires(ChangeOperation::Insert, None, Some(&won)));
  }

  #[test]
  fn field_changed_respects_from() {
    let event = TriggerEvent::FieldChanged {
      field: "funnel.stage".into(),
      from: Some(json!("lead")),
      to: None,
    };
    let lead = json!({"funnel": {"stage": "lead"}});
    let visit = json!({"funnel": {"stage": "visit"}});
    let proposal = json!({"funnel": {"stage": "proposal"}});

    assert!(event.fires(ChangeOperation::Update, Some(&lead), Some(&visit)));
    assert!(!event.fires(ChangeOperation::Update, Some(&visit), Some(&proposal)));
  }

  #[test]
  fn plain_events_match_operation() {
    assert!(TriggerEvent::Inserted.fires(ChangeOperation::Insert, None, None));
    assert!(!TriggerEvent::Inserted.fires(ChangeOperation::Update, None, None));
    assert!(TriggerEvent::Deleted.fires(ChangeOperation::Delete, None, None));
  }

  #[test]
  fn validate_rejects_bookkeeping_triggers() {
    let r = rule(json!({
      "title": "Loop",
      "trigger": {"entity": "notifications", "event": {"type": "inserted"}},
      "action": {"type": "createNotification", "message": "again", "recipients": "responsibles"}
    }));
    assert_eq!(r.validate().unwrap_err().field, "trigger.entity");
  }

  #[test]
  fn validate_rejects_empty_changes() {
    let r = rule(json!({
      "title": "Noop",
      "trigger": {"entity": "projects", "event": {"type": "updated"}},
      "action": {"type": "updateFields", "target": "self", "changes": {}}
    }));
    assert_eq!(r.validate().unwrap_err().field, "action.changes");
  }
}
