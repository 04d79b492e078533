use axum::{
  extract::{Request, State},
  http::{header, HeaderMap, HeaderValue},
  middleware::Next,
  response::{IntoResponse, Response},
  Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::{ok, ApiResult, Envelope, Payload};
use super::error::AppError;
use super::AppState;
use crate::db::User;

#[derive(Deserialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
  pub user: User,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

/// Session token from the configured cookie, falling back to `Authorization: Bearer`.
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
  let from_cookie = headers
    .get_all(header::COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(name, _)| *name == cookie_name)
    .map(|(_, value)| value.to_string());

  from_cookie
    .filter(|t| !t.is_empty())
    .or_else(|| {
      headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
    })
}

fn session_cookie(state: &AppState, token: &str, max_age_secs: i64) -> Option<HeaderValue> {
  let mut cookie = format!(
    "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
    state.settings.cookie_name, token, max_age_secs
  );
  if state.settings.secure_cookie {
    cookie.push_str("; Secure");
  }
  HeaderValue::from_str(&cookie).ok()
}

/// Reject requests without a valid session; expose the user to handlers as `Extension<User>`.
pub async fn require_session(
  State(state): State<AppState>,
  mut req: Request,
  next: Next,
) -> Response {
  let Some(token) = extract_token(req.headers(), &state.settings.cookie_name) else {
    return AppError::Unauthorized("Authentication required".into()).into_response();
  };

  match state.auth.authenticate(&token).await {
    Ok(Some(user)) => {
      req.extensions_mut().insert(user);
      next.run(req).await
    }
    Ok(None) => AppError::Unauthorized("Session expired or invalid".into()).into_response(),
    Err(e) => AppError::from(e).into_response(),
  }
}

/// POST /api/auth/login
pub async fn login(
  State(state): State<AppState>,
  Payload(req): Payload<LoginRequest>,
) -> Result<Response, AppError> {
  let issued = state.auth.login(&req.email, &req.password).await?;
  let max_age = state.auth.session_ttl().num_seconds();

  let mut response = Json(Envelope {
    data: SessionInfo {
      user: issued.user,
      expires_at: Some(issued.expires_at),
    },
    message: Some("Logged in".to_string()),
  })
  .into_response();
  if let Some(cookie) = session_cookie(&state, &issued.token, max_age) {
    response.headers_mut().insert(header::SET_COOKIE, cookie);
  }
  Ok(response)
}

/// POST /api/auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
  if let Some(token) = extract_token(&headers, &state.settings.cookie_name) {
    state.auth.logout(&token).await?;
  }

  let mut response = Json(Envelope {
    data: serde_json::Value::Null,
    message: Some("Logged out".to_string()),
  })
  .into_response();
  if let Some(cookie) = session_cookie(&state, "", 0) {
    response.headers_mut().insert(header::SET_COOKIE, cookie);
  }
  Ok(response)
}

/// GET /api/auth/session
pub async fn current_session(Extension(user): Extension<User>) -> ApiResult<SessionInfo> {
  ok(SessionInfo {
    user,
    expires_at: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_from_cookie_or_bearer() {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::COOKIE,
      HeaderValue::from_static("theme=dark; session-token=abc123; lang=pt"),
    );
    assert_eq!(extract_token(&headers, "session-token"), Some("abc123".into()));

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
    assert_eq!(extract_token(&headers, "session-token"), Some("xyz".into()));

    assert_eq!(extract_token(&HeaderMap::new(), "session-token"), None);
  }

  #[test]
  fn cookie_prefix_does_not_match_other_names() {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::COOKIE,
      HeaderValue::from_static("old-session-token=nope"),
    );
    assert_eq!(extract_token(&headers, "session-token"), None);
  }
}
