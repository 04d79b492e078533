use thiserror::Error;

use crate::crm::CrmError;
use crate::integrations::IntegrationError;

#[derive(Debug, Error)]
pub enum AutomationError {
  #[error("Invalid rule {id}: {reason}")]
  InvalidRule { id: String, reason: String },
  #[error("Target not found: {entity} referenced by {field}")]
  MissingTarget { entity: String, field: String },
  #[error("Dispatch failed: {0}")]
  Dispatch(#[from] IntegrationError),
  #[error(transparent)]
  Crm(#[from] CrmError),
}
