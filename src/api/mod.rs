//! HTTP JSON API.

mod access;
mod actions;
mod envelope;
mod error;
mod resources;
mod session;
mod users;

use std::sync::Arc;

use axum::{
  extract::State,
  http::StatusCode,
  routing::{get, post, put},
  Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use envelope::{ApiResult, Envelope};
pub use error::AppError;
pub use session::extract_token;

use crate::auth::AuthService;
use crate::crm::{EntityKind, Repository};
use crate::db::DatabaseBackend;
use crate::integrations::DocumentRenderer;
use crate::server::ServerConfig;

/// Request-independent API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
  pub cookie_name: String,
  pub secure_cookie: bool,
  pub default_page_size: usize,
  pub max_page_size: usize,
  pub cors_origins: Vec<String>,
}

impl Default for ApiSettings {
  fn default() -> Self {
    Self {
      cookie_name: "session-token".into(),
      secure_cookie: false,
      default_page_size: 50,
      max_page_size: 500,
      cors_origins: Vec::new(),
    }
  }
}

impl ApiSettings {
  pub fn from_config(config: &ServerConfig) -> Self {
    Self {
      cookie_name: config.auth.cookie_name.clone(),
      secure_cookie: config.auth.secure_cookie,
      default_page_size: config.limits.default_page_size,
      max_page_size: config.limits.max_page_size,
      cors_origins: config.server.cors_origins.clone(),
    }
  }

  /// Requested page size, defaulted and clamped.
  pub fn page_size(&self, requested: Option<usize>) -> usize {
    requested
      .unwrap_or(self.default_page_size)
      .clamp(1, self.max_page_size.max(1))
  }
}

#[derive(Clone)]
pub struct AppState {
  pub backend: Arc<dyn DatabaseBackend>,
  pub repo: Repository,
  pub auth: Arc<AuthService>,
  pub documents: Arc<dyn DocumentRenderer>,
  pub settings: Arc<ApiSettings>,
}

impl AppState {
  pub fn new(
    backend: Arc<dyn DatabaseBackend>,
    auth: Arc<AuthService>,
    documents: Arc<dyn DocumentRenderer>,
    settings: ApiSettings,
  ) -> Self {
    Self {
      repo: Repository::new(backend.clone()),
      backend,
      auth,
      documents,
      settings: Arc::new(settings),
    }
  }
}

/// Liveness probe
async fn health_check() -> StatusCode {
  StatusCode::OK
}

/// Readiness probe - 200 when the database answers
async fn readiness_check(State(state): State<AppState>) -> StatusCode {
  match state.backend.ping().await {
    Ok(()) => StatusCode::OK,
    Err(e) => {
      tracing::warn!("Readiness check failed: {}", e);
      StatusCode::SERVICE_UNAVAILABLE
    }
  }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
  if origins.is_empty() || origins.iter().any(|o| o == "*") {
    CorsLayer::permissive()
  } else {
    let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
      .allow_origin(origins)
      .allow_methods(Any)
      .allow_headers(Any)
  }
}

/// Generic CRUD routes for every resource, each tagged with its entity kind.
fn resource_routes() -> Router<AppState> {
  let mut router = Router::new();
  for kind in EntityKind::RESOURCES {
    let base = format!("/api/{}", kind.route());
    router = router
      .route(
        &base,
        get(resources::list_records)
          .post(resources::create_record)
          .layer(Extension(kind)),
      )
      .route(
        &format!("{}/search", base),
        post(resources::search_records).layer(Extension(kind)),
      )
      .route(
        &format!("{}/{{id}}", base),
        get(resources::get_record)
          .put(resources::update_record)
          .delete(resources::delete_record)
          .layer(Extension(kind)),
      );
  }
  router
}

pub fn router(state: AppState) -> Router {
  let protected = resource_routes()
    .route("/api/auth/logout", post(session::logout))
    .route("/api/auth/session", get(session::current_session))
    .route("/api/opportunities/{id}/win", post(actions::win_opportunity))
    .route("/api/opportunities/{id}/lose", post(actions::lose_opportunity))
    .route(
      "/api/notifications/{id}/read",
      put(actions::mark_notification_read),
    )
    .route("/api/proposals/{id}/pdf", get(actions::proposal_pdf))
    .route(
      "/api/automations/{id}/executions",
      get(actions::automation_executions),
    )
    .route("/api/users", get(users::list_users).post(users::create_user))
    .route("/api/users/{id}", axum::routing::delete(users::delete_user))
    .route_layer(axum::middleware::from_fn_with_state(
      state.clone(),
      session::require_session,
    ));

  Router::new()
    .route("/health", get(health_check))
    .route("/ready", get(readiness_check))
    .route("/api/auth/login", post(session::login))
    .merge(protected)
    .fallback(|| async { AppError::NotFound("Route not found".into()) })
    .layer(TraceLayer::new_for_http())
    .layer(cors_layer(&state.settings.cors_origins))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn page_size_is_clamped() {
    let settings = ApiSettings::default();
    assert_eq!(settings.page_size(None), 50);
    assert_eq!(settings.page_size(Some(0)), 1);
    assert_eq!(settings.page_size(Some(10_000)), 500);
  }
}
