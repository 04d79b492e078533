use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::error::AutomationError;
use super::rule::{Action, AutomationRule, UpdateTarget};
use super::template::render;
use crate::crm::schema::{AUTOMATION_MARK, ID_FIELD, PARTNER_FIELD};
use crate::crm::{timestamp, CrmError, EntityKind, PartnerScope, Repository};
use crate::integrations::{IntegrationError, WorkflowClient, WorkflowEvent};
use crate::query::{lookup, matches};
use crate::types::{Change, ChangeOperation, FindOptions, StructuredFilter};

/// `updateFields` writes more than this many hops away from a user change are skipped.
pub const MAX_CHAIN_DEPTH: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  Success,
  Failure,
  /// The action had nothing to do (target already up to date, service not configured)
  Skipped,
}

/// Outcome of one rule firing on one change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
  pub automation_id: String,
  pub action: &'static str,
  pub status: ExecutionStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Evaluates stored automation rules against document changes.
pub struct AutomationEngine {
  repo: Repository,
  workflows: Arc<dyn WorkflowClient>,
}

impl AutomationEngine {
  pub fn new(repo: Repository, workflows: Arc<dyn WorkflowClient>) -> Self {
    Self { repo, workflows }
  }

  /// Consume the backend change broadcast until shutdown.
  pub async fn run(
    self: Arc<Self>,
    mut changes: broadcast::Receiver<Change>,
    mut shutdown: broadcast::Receiver<()>,
  ) {
    tracing::info!("Automation engine started");
    loop {
      tokio::select! {
        _ = shutdown.recv() => break,
        received = changes.recv() => match received {
          Ok(change) => {
            if let Err(e) = self.process_change(&change).await {
              tracing::error!(
                collection = %change.collection,
                document = %change.document_id,
                "Automation processing failed: {}", e
              );
            }
          }
          Err(broadcast::error::RecvError::Lagged(n)) => {
            tracing::warn!("Automation engine lagged, {} changes dropped", n);
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    }
    tracing::info!("Automation engine stopped");
  }

  /// Run every active rule of the change's partner whose trigger and condition match.
  pub async fn process_change(&self, change: &Change) -> Result<Vec<Execution>, AutomationError> {
    let Some(kind) = EntityKind::from_collection(&change.collection).filter(|k| k.automatable())
    else {
      return Ok(Vec::new());
    };
    let Some(current) = change.current() else {
      return Ok(Vec::new());
    };
    let Some(partner) = current.get(PARTNER_FIELD).and_then(Value::as_str) else {
      return Ok(Vec::new());
    };
    let scope = PartnerScope::Partner(partner.to_string());

    let mut record = current.clone();
    if let Value::Object(map) = &mut record {
      map.insert(ID_FIELD.into(), Value::String(change.document_id.to_string()));
    }

    let depth = chain_depth(change);
    let mut executions = Vec::new();
    for (rule_id, rule) in self.load_rules(&scope, kind).await? {
      let fires = rule.trigger.event.fires(
        change.operation,
        change.old_data.as_ref(),
        change.new_data.as_ref(),
      );
      if !fires || !rule.condition.as_ref().map_or(true, |c| matches(c, &record)) {
        continue;
      }

      let outcome = self
        .execute(&scope, kind, change, &record, depth, &rule_id, &rule)
        .await;
      let (status, error) = match outcome {
        Ok(status) => (status, None),
        Err(e) => {
          tracing::warn!(automation = %rule_id, title = %rule.title, "Automation failed: {}", e);
          (ExecutionStatus::Failure, Some(e.to_string()))
        }
      };
      tracing::debug!(automation = %rule_id, action = rule.action.name(), ?status, "Automation executed");

      let execution = Execution {
        automation_id: rule_id,
        action: rule.action.name(),
        status,
        error,
      };
      if let Err(e) = self.record_execution(&scope, kind, change, &execution).await {
        tracing::warn!(automation = %execution.automation_id, "Failed to record execution: {}", e);
      }
      executions.push(execution);
    }
    Ok(executions)
  }

  async fn load_rules(
    &self,
    scope: &PartnerScope,
    kind: EntityKind,
  ) -> Result<Vec<(String, AutomationRule)>, AutomationError> {
    let filter = StructuredFilter::all(vec![
      StructuredFilter::eq("active", true),
      StructuredFilter::eq("trigger.entity", kind.collection()),
    ]);
    let docs = self
      .repo
      .query(EntityKind::Automations, scope, FindOptions::filter(filter))
      .await?;

    let mut rules = Vec::with_capacity(docs.len());
    for doc in docs {
      let id = doc.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default().to_string();
      match serde_json::from_value::<AutomationRule>(doc) {
        Ok(rule) => rules.push((id, rule)),
        Err(e) => {
          let err = AutomationError::InvalidRule {
            id,
            reason: e.to_string(),
          };
          tracing::warn!("Skipping automation: {}", err);
        }
      }
    }
    Ok(rules)
  }

  #[allow(clippy::too_many_arguments)]
  async fn execute(
    &self,
    scope: &PartnerScope,
    kind: EntityKind,
    change: &Change,
    record: &Value,
    depth: u64,
    rule_id: &str,
    rule: &AutomationRule,
  ) -> Result<ExecutionStatus, AutomationError> {
    match &rule.action {
      Action::CreateNotification {
        message,
        recipients,
      } => {
        let notification = json!({
          "message": render(message, record),
          "recipients": recipients.resolve(record),
          "reference": {"entity": kind.collection(), "id": change.document_id.to_string()},
          "automationId": rule_id,
          "readAt": null,
        });
        self
          .repo
          .insert(EntityKind::Notifications, scope, notification)
          .await?;
        Ok(ExecutionStatus::Success)
      }

      Action::UpdateFields { target, changes } => {
        if depth >= MAX_CHAIN_DEPTH {
          tracing::warn!(
            automation = %rule_id,
            document = %change.document_id,
            depth,
            "Automation chain too deep, update skipped"
          );
          return Ok(ExecutionStatus::Skipped);
        }
        let (target_kind, target_id) = match target {
          UpdateTarget::Itself(_) => {
            if change.operation == ChangeOperation::Delete {
              return Err(AutomationError::MissingTarget {
                entity: kind.collection().into(),
                field: ID_FIELD.into(),
              });
            }
            (kind, change.document_id.to_string())
          }
          UpdateTarget::Related { related, entity } => {
            let id = lookup(record, related)
              .and_then(Value::as_str)
              .ok_or_else(|| AutomationError::MissingTarget {
                entity: entity.collection().into(),
                field: related.clone(),
              })?;
            (*entity, id.to_string())
          }
        };

        let current = match self.repo.get(target_kind, scope, &target_id).await {
          Ok(doc) => doc,
          Err(CrmError::NotFound(_)) => {
            return Err(AutomationError::MissingTarget {
              entity: target_kind.collection().into(),
              field: target_id,
            })
          }
          Err(e) => return Err(e.into()),
        };

        if !differs(&current, changes) {
          return Ok(ExecutionStatus::Skipped);
        }
        let mark = json!({
          "automationId": rule_id,
          "depth": depth + 1,
          "writeId": Uuid::new_v4().to_string(),
        });
        self
          .repo
          .update_as_automation(target_kind, scope, &target_id, Value::Object(changes.clone()), mark)
          .await?;
        Ok(ExecutionStatus::Success)
      }

      Action::TriggerWorkflow {
        workflow,
        recipients,
      } => {
        if !self.workflows.is_configured() {
          tracing::info!(workflow = %workflow, "Workflow service not configured, skipping");
          return Ok(ExecutionStatus::Skipped);
        }
        let subscribers = recipients.resolve(record).into_iter().map(|r| r.id);
        let event = WorkflowEvent::new(
          workflow.clone(),
          subscribers,
          json!({
            "entity": kind.collection(),
            "entityId": change.document_id.to_string(),
            "automationId": rule_id,
            "record": record,
          }),
        );
        match self.workflows.trigger(&event).await {
          Ok(()) => Ok(ExecutionStatus::Success),
          Err(IntegrationError::NotConfigured(_)) => Ok(ExecutionStatus::Skipped),
          Err(e) => Err(e.into()),
        }
      }
    }
  }

  async fn record_execution(
    &self,
    scope: &PartnerScope,
    kind: EntityKind,
    change: &Change,
    execution: &Execution,
  ) -> Result<(), CrmError> {
    let mut doc = json!({
      "automationId": execution.automation_id,
      "entity": kind.collection(),
      "entityId": change.document_id.to_string(),
      "action": execution.action,
      "status": execution.status,
      "executedAt": timestamp(),
    });
    if let (Some(error), Value::Object(map)) = (&execution.error, &mut doc) {
      map.insert("error".into(), Value::String(error.clone()));
    }
    self
      .repo
      .insert(EntityKind::AutomationExecutions, scope, doc)
      .await?;
    Ok(())
  }
}

/// Automation writes between a user change and `change`. Only an update that
/// replaced the `automatedBy` mark was made by an automation.
fn chain_depth(change: &Change) -> u64 {
  if change.operation != ChangeOperation::Update {
    return 0;
  }
  let mark = |data: &Option<Value>| data.as_ref().and_then(|d| d.get(AUTOMATION_MARK)).cloned();
  match (mark(&change.old_data), mark(&change.new_data)) {
    (before, Some(after)) if before.as_ref() != Some(&after) => {
      after.get("depth").and_then(Value::as_u64).unwrap_or(0)
    }
    _ => 0,
  }
}

/// Whether applying `changes` would alter `current`; missing and null are the same.
fn differs(current: &Value, changes: &Map<String, Value>) -> bool {
  changes.iter().any(|(field, value)| {
    let existing = current.get(field).filter(|v| !v.is_null());
    let wanted = Some(value).filter(|v| !v.is_null());
    existing != wanted
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn differs_ignores_identical_values() {
    let current = json!({"status": "installed", "value": 10, "note": null});
    let same: Map<String, Value> = serde_json::from_value(json!({"status": "installed"})).unwrap();
    assert!(!differs(&current, &same));

    let cleared: Map<String, Value> = serde_json::from_value(json!({"note": null, "other": null})).unwrap();
    assert!(!differs(&current, &cleared));

    let changed: Map<String, Value> = serde_json::from_value(json!({"value": 11})).unwrap();
    assert!(differs(&current, &changed));
  }

  fn update(old: Value, new: Value) -> Change {
    Change {
      id: 1,
      collection: "opportunities".into(),
      document_id: Uuid::new_v4(),
      operation: ChangeOperation::Update,
      old_data: Some(old),
      new_data: Some(new),
      changed_at: chrono::Utc::now(),
    }
  }

  #[test]
  fn chain_depth_follows_replaced_marks() {
    let mark = json!({"automationId": "a1", "depth": 2, "writeId": "w1"});
    let user_edit = update(
      json!({"name": "x", "automatedBy": mark}),
      json!({"name": "y", "automatedBy": mark}),
    );
    assert_eq!(chain_depth(&user_edit), 0);

    let automated = update(
      json!({"name": "x"}),
      json!({"name": "y", "automatedBy": mark}),
    );
    assert_eq!(chain_depth(&automated), 2);

    let next = json!({"automationId": "a1", "depth": 3, "writeId": "w2"});
    let chained = update(json!({"automatedBy": mark}), json!({"automatedBy": next}));
    assert_eq!(chain_depth(&chained), 3);
  }
}
