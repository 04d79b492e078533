use axum::{
  extract::{Path, Query, State},
  Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use super::access::{require_role, scope_for};
use super::envelope::{created, ok, ok_with, ApiResult, Created, Payload};
use super::error::AppError;
use super::AppState;
use crate::auth::Registration;
use crate::crm::{CrmError, EntityKind, PartnerScope};
use crate::db::{User, UserRole};

#[derive(Deserialize)]
pub struct UserListParams {
  pub partner: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
  pub name: String,
  pub email: String,
  pub password: String,
  #[serde(default)]
  pub role: Option<UserRole>,
  #[serde(rename = "idParceiro")]
  pub partner_id: Option<String>,
}

/// GET /api/users
pub async fn list_users(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Query(params): Query<UserListParams>,
) -> ApiResult<Vec<User>> {
  require_role(&user, UserRole::Manager)?;
  let scope = scope_for(&user, params.partner.as_deref());
  let users = state.backend.list_users(scope.partner()).await?;
  ok(users)
}

/// POST /api/users
pub async fn create_user(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Payload(req): Payload<CreateUserRequest>,
) -> Created<User> {
  require_role(&user, UserRole::Manager)?;

  let role = req.role.unwrap_or(UserRole::User);
  if role > user.role {
    return Err(AppError::Forbidden(format!(
      "Cannot grant the {} role",
      role
    )));
  }

  let partner_id = match (user.role, req.partner_id) {
    (UserRole::Admin, Some(partner)) => {
      // Must reference an existing partner
      match state.repo.get(EntityKind::Partners, &PartnerScope::All, &partner).await {
        Ok(_) => partner,
        Err(CrmError::NotFound(_)) => {
          return Err(AppError::BadRequest("idParceiro: unknown partner".into()))
        }
        Err(e) => return Err(e.into()),
      }
    }
    (UserRole::Admin, None) => {
      return Err(AppError::BadRequest("idParceiro: is required".into()));
    }
    _ => user.partner_id.clone(),
  };

  let created_user = state
    .auth
    .register(Registration {
      partner_id: &partner_id,
      name: &req.name,
      email: &req.email,
      password: &req.password,
      role,
    })
    .await?;
  created(created_user, "User created")
}

/// DELETE /api/users/{id}
pub async fn delete_user(
  State(state): State<AppState>,
  Extension(user): Extension<User>,
  Path(id): Path<String>,
) -> ApiResult<User> {
  require_role(&user, UserRole::Manager)?;

  let not_found = || AppError::NotFound("User not found".into());
  let target_id: Uuid = id.parse().map_err(|_| not_found())?;
  let target = state
    .backend
    .get_user(target_id)
    .await?
    .filter(|t| user.role == UserRole::Admin || t.partner_id == user.partner_id)
    .ok_or_else(not_found)?;

  if target.id == user.id {
    return Err(AppError::BadRequest("Cannot delete your own account".into()));
  }
  if target.role > user.role {
    return Err(AppError::Forbidden("Cannot delete a user with a higher role".into()));
  }

  state.auth.remove_user(&target).await?;
  ok_with(target, "User deleted")
}
