//! Multi-document operations kept consistent by ordered writes.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::error::{CrmError, ValidationError};
use super::kind::EntityKind;
use super::repository::{timestamp, PartnerScope, Repository};
use super::schema::{ID_FIELD, PARTNER_FIELD};

/// Fields copied from the opportunity onto the project it produces.
const CARRIED_OVER: &[&str] = &["responsibles", "address", "type"];

#[derive(Debug, Clone, Serialize)]
pub struct WonOpportunity {
  pub opportunity: Value,
  pub project: Value,
}

fn status_of(record: &Value) -> &str {
  record.get("status").and_then(Value::as_str).unwrap_or("open")
}

/// Mark an opportunity won with the given proposal and open a project for it.
///
/// Writes happen in order: opportunity status, project insert, project id back on the
/// opportunity. A failure part-way leaves the earlier writes in place.
pub async fn win_opportunity(
  repo: &Repository,
  scope: &PartnerScope,
  opportunity_id: &str,
  proposal_id: &str,
) -> Result<WonOpportunity, CrmError> {
  let opportunity = repo.get(EntityKind::Opportunities, scope, opportunity_id).await?;
  if status_of(&opportunity) != "open" {
    return Err(CrmError::Conflict(format!(
      "Opportunity is already {}",
      status_of(&opportunity)
    )));
  }

  let proposal = repo.get(EntityKind::Proposals, scope, proposal_id).await?;
  if proposal.get("opportunityId").and_then(Value::as_str) != Some(opportunity_id) {
    return Err(
      ValidationError::new("proposalId", "does not belong to this opportunity").into(),
    );
  }

  let opportunity = repo
    .update(
      EntityKind::Opportunities,
      scope,
      opportunity_id,
      json!({
        "status": "won",
        "wonAt": timestamp(),
        "winningProposalId": proposal_id,
      }),
    )
    .await?;

  let mut project = Map::new();
  project.insert(
    "name".into(),
    opportunity.get("name").cloned().unwrap_or(Value::Null),
  );
  project.insert(
    "clientId".into(),
    opportunity.get("clientId").cloned().unwrap_or(Value::Null),
  );
  project.insert("opportunityId".into(), json!(opportunity_id));
  project.insert("proposalId".into(), json!(proposal_id));
  project.insert("status".into(), json!("pending"));
  if let Some(value) = proposal.get("value").filter(|v| v.is_number()) {
    project.insert("value".into(), value.clone());
  }
  for field in CARRIED_OVER {
    if let Some(v) = opportunity.get(*field).filter(|v| !v.is_null()) {
      project.insert((*field).to_string(), v.clone());
    }
  }
  // Admin callers act on behalf of the opportunity's partner
  if let Some(partner) = opportunity.get(PARTNER_FIELD) {
    project.insert(PARTNER_FIELD.into(), partner.clone());
  }

  let project = repo
    .insert(EntityKind::Projects, scope, Value::Object(project))
    .await?;
  let project_id = project.get(ID_FIELD).cloned().unwrap_or(Value::Null);

  let opportunity = repo
    .update(
      EntityKind::Opportunities,
      scope,
      opportunity_id,
      json!({ "projectId": project_id }),
    )
    .await?;

  tracing::info!(
    opportunity = opportunity_id,
    proposal = proposal_id,
    "Opportunity won"
  );
  Ok(WonOpportunity {
    opportunity,
    project,
  })
}

pub async fn lose_opportunity(
  repo: &Repository,
  scope: &PartnerScope,
  opportunity_id: &str,
  reason: &str,
) -> Result<Value, CrmError> {
  if reason.trim().is_empty() {
    return Err(ValidationError::new("reason", "is required").into());
  }

  let opportunity = repo.get(EntityKind::Opportunities, scope, opportunity_id).await?;
  match status_of(&opportunity) {
    "won" => return Err(CrmError::Conflict("Opportunity is already won".into())),
    // The first loss keeps its time and reason
    "lost" => return Ok(opportunity),
    _ => {}
  }

  repo
    .update(
      EntityKind::Opportunities,
      scope,
      opportunity_id,
      json!({
        "status": "lost",
        "lostAt": timestamp(),
        "lossReason": reason,
      }),
    )
    .await
}

/// Stamp `readAt` once; re-reading keeps the original time.
pub async fn mark_notification_read(
  repo: &Repository,
  scope: &PartnerScope,
  notification_id: &str,
) -> Result<Value, CrmError> {
  let notification = repo.get(EntityKind::Notifications, scope, notification_id).await?;
  if notification.get("readAt").is_some_and(|v| !v.is_null()) {
    return Ok(notification);
  }
  repo
    .update(
      EntityKind::Notifications,
      scope,
      notification_id,
      json!({ "readAt": timestamp() }),
    )
    .await
}
