//! Workflow endpoints that go beyond plain CRUD.

use axum::{
  extract::{Path, Query, State},
  http::header,
  response::{IntoResponse, Response},
  Extension,
};
use serde::Deserialize;
use serde_json::Value;

use super::access::{authorize, scope_for};
use super::envelope::{ok, ok_with, ApiResult, Payload};
use super::error::AppError;
use super::AppState;
use crate::crm::{self, EntityKind, WonOpportunity};
use crate::db::User;
use crate::integrations::proposal_html;
use crate::types::{FindOptions, OrderBySpec, OrderDirection, StructuredFilter};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinRequest {
  pub proposal_id: String,
}

#[derive(Deserialize)]
pub struct LoseRequest {
  #[serde(default)]
  pub reason: String,
}

#[derive(Deserialize)]
pub struct ExecutionParams {
  pub limit: Option<usize>,
}

/// POST /api/opportunities/{id}/win
pub async fn win_opportunity(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
  Payload(req): Payload<WinRequest>,
) -> ApiResult<WonOpportunity> {
  authorize(&user, EntityKind::Opportunities)?;
  let scope = scope_for(&user, None);
  let won = crm::win_opportunity(&state.repo, &scope, &id, &req.proposal_id).await?;
  ok_with(won, "Opportunity won")
}

/// POST /api/opportunities/{id}/lose
pub async fn lose_opportunity(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
  Payload(req): Payload<LoseRequest>,
) -> ApiResult<Value> {
  authorize(&user, EntityKind::Opportunities)?;
  let scope = scope_for(&user, None);
  let lost = crm::lose_opportunity(&state.repo, &scope, &id, &req.reason).await?;
  ok_with(lost, "Opportunity lost")
}

/// PUT /api/notifications/{id}/read
pub async fn mark_notification_read(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
) -> ApiResult<Value> {
  authorize(&user, EntityKind::Notifications)?;
  let scope = scope_for(&user, None);
  let notification = crm::mark_notification_read(&state.repo, &scope, &id).await?;
  ok(notification)
}

/// GET /api/proposals/{id}/pdf
pub async fn proposal_pdf(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
) -> Result<Response, AppError> {
  authorize(&user, EntityKind::Proposals)?;
  let scope = scope_for(&user, None);
  let proposal = state.repo.get(EntityKind::Proposals, &scope, &id).await?;

  let opportunity = match proposal.get("opportunityId").and_then(Value::as_str) {
    Some(opp_id) => state.repo.find(EntityKind::Opportunities, &scope, opp_id).await?,
    None => None,
  };
  let client = match opportunity
    .as_ref()
    .and_then(|o| o.get("clientId"))
    .and_then(Value::as_str)
  {
    Some(client_id) => state.repo.find(EntityKind::Clients, &scope, client_id).await?,
    None => None,
  };

  let html = proposal_html(&proposal, opportunity.as_ref(), client.as_ref());
  let file_name = format!("proposal-{}.pdf", id);
  let pdf = state.documents.render_pdf(&html, &file_name).await?;

  Ok(
    (
      [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
          header::CONTENT_DISPOSITION,
          format!("inline; filename=\"{}\"", file_name),
        ),
      ],
      pdf,
    )
      .into_response(),
  )
}

/// GET /api/automations/{id}/executions
pub async fn automation_executions(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
  Query(params): Query<ExecutionParams>,
) -> ApiResult<Vec<Value>> {
  authorize(&user, EntityKind::AutomationExecutions)?;
  let scope = scope_for(&user, None);
  // Existence and partner check
  state.repo.get(EntityKind::Automations, &scope, &id).await?;

  let options = FindOptions {
    filter: Some(StructuredFilter::eq("automationId", id)),
    order: Some(OrderBySpec {
      field: "executedAt".into(),
      direction: OrderDirection::Desc,
    }),
    limit: Some(state.settings.page_size(params.limit)),
    skip: None,
  };
  let executions = state
    .repo
    .query(EntityKind::AutomationExecutions, &scope, options)
    .await?;
  ok(executions)
}
