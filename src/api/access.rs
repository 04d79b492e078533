use super::error::AppError;
use crate::crm::{EntityKind, PartnerScope};
use crate::db::{User, UserRole};

pub fn require_role(user: &User, role: UserRole) -> Result<(), AppError> {
  if user.role >= role {
    Ok(())
  } else {
    Err(AppError::Forbidden(format!("{} access required", role)))
  }
}

/// Minimum role needed to work with a resource.
pub fn required_role(kind: EntityKind) -> UserRole {
  match kind {
    EntityKind::Partners => UserRole::Admin,
    EntityKind::Automations | EntityKind::AutomationExecutions => UserRole::Manager,
    _ => UserRole::User,
  }
}

pub fn authorize(user: &User, kind: EntityKind) -> Result<(), AppError> {
  require_role(user, required_role(kind))
}

/// Admins may pick a partner (or see all); everyone else is pinned to their own.
pub fn scope_for(user: &User, requested: Option<&str>) -> PartnerScope {
  match (user.role, requested.filter(|p| !p.is_empty())) {
    (UserRole::Admin, Some(partner)) => PartnerScope::Partner(partner.to_string()),
    (UserRole::Admin, None) => PartnerScope::All,
    _ => PartnerScope::Partner(user.partner_id.clone()),
  }
}
