use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};

use crate::auth::AuthError;
use crate::automation::AutomationError;
use crate::crm::CrmError;
use crate::integrations::IntegrationError;

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
pub enum AppError {
  BadRequest(String),
  Unauthorized(String),
  Forbidden(String),
  NotFound(String),
  Conflict(String),
  /// A dependency is not configured or not reachable
  Unavailable(String),
  /// A third-party service answered with an error
  BadGateway(String),
  Internal(anyhow::Error),
}

impl AppError {
  pub fn status(&self) -> StatusCode {
    match self {
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      Self::Forbidden(_) => StatusCode::FORBIDDEN,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::Conflict(_) => StatusCode::CONFLICT,
      Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
      Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(e: anyhow::Error) -> Self {
    Self::Internal(e)
  }
}

impl From<CrmError> for AppError {
  fn from(e: CrmError) -> Self {
    match e {
      CrmError::Validation(v) => Self::BadRequest(v.to_string()),
      CrmError::Filter(f) => Self::BadRequest(format!("Invalid filter: {}", f)),
      CrmError::NotFound(what) => Self::NotFound(format!("{} not found", what)),
      CrmError::Conflict(msg) => Self::Conflict(msg),
      CrmError::Storage(e) => Self::Internal(e),
    }
  }
}

impl From<AuthError> for AppError {
  fn from(e: AuthError) -> Self {
    match e {
      AuthError::InvalidCredentials => Self::Unauthorized(e.to_string()),
      AuthError::Invalid(v) => Self::BadRequest(v.to_string()),
      AuthError::EmailTaken => Self::Conflict(e.to_string()),
      AuthError::Hash(msg) => Self::Internal(anyhow::anyhow!(msg)),
      AuthError::Storage(e) => Self::Internal(e),
    }
  }
}

impl From<IntegrationError> for AppError {
  fn from(e: IntegrationError) -> Self {
    match e {
      IntegrationError::NotConfigured(_) => Self::Unavailable(e.to_string()),
      IntegrationError::Http(_) | IntegrationError::Status { .. } => {
        tracing::warn!("Third-party call failed: {}", e);
        Self::BadGateway(e.to_string())
      }
    }
  }
}

impl From<AutomationError> for AppError {
  fn from(e: AutomationError) -> Self {
    match e {
      AutomationError::InvalidRule { .. } => Self::BadRequest(e.to_string()),
      AutomationError::MissingTarget { .. } => Self::NotFound(e.to_string()),
      AutomationError::Dispatch(inner) => inner.into(),
      AutomationError::Crm(inner) => inner.into(),
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let msg = match self {
      Self::Internal(e) => {
        tracing::error!("Request failed: {:#}", e);
        INTERNAL_MESSAGE.to_string()
      }
      Self::BadRequest(msg)
      | Self::Unauthorized(msg)
      | Self::Forbidden(msg)
      | Self::NotFound(msg)
      | Self::Conflict(msg)
      | Self::Unavailable(msg)
      | Self::BadGateway(msg) => msg,
    };
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
  }
}
