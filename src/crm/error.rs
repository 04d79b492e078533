use thiserror::Error;

use crate::query::FilterError;

/// A payload that failed schema validation, naming the offending field.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
  pub field: String,
  pub message: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum CrmError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("{0} not found")]
  NotFound(String),
  #[error("{0}")]
  Conflict(String),
  #[error("Invalid filter: {0}")]
  Filter(#[from] FilterError),
  #[error(transparent)]
  Storage(#[from] anyhow::Error),
}

impl CrmError {
  pub fn not_found(what: impl Into<String>) -> Self {
    Self::NotFound(what.into())
  }
}
