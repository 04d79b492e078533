use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::credentials::{
  generate_session_token, hash_password, hash_session_token, verify_password, MIN_PASSWORD_LENGTH,
};
use crate::crm::ValidationError;
use crate::db::{DatabaseBackend, NewUser, User, UserRole};

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("Invalid email or password")]
  InvalidCredentials,
  #[error(transparent)]
  Invalid(#[from] ValidationError),
  #[error("A user with this email already exists")]
  EmailTaken,
  #[error("Password hashing failed: {0}")]
  Hash(String),
  #[error(transparent)]
  Storage(#[from] anyhow::Error),
}

/// A freshly issued session. `token` is returned to the client exactly once.
#[derive(Debug, Clone)]
pub struct IssuedSession {
  pub token: String,
  pub user: User,
  pub expires_at: DateTime<Utc>,
}

/// Registration input for a new user
#[derive(Debug, Clone)]
pub struct Registration<'a> {
  pub partner_id: &'a str,
  pub name: &'a str,
  pub email: &'a str,
  pub password: &'a str,
  pub role: UserRole,
}

/// Session-cookie authentication over the backend's users and sessions tables.
pub struct AuthService {
  backend: Arc<dyn DatabaseBackend>,
  session_ttl: Duration,
}

impl AuthService {
  pub fn new(backend: Arc<dyn DatabaseBackend>, session_ttl: Duration) -> Self {
    Self {
      backend,
      session_ttl,
    }
  }

  pub fn session_ttl(&self) -> Duration {
    self.session_ttl
  }

  pub async fn login(&self, email: &str, password: &str) -> Result<IssuedSession, AuthError> {
    let Some((user, hash)) = self.backend.get_user_by_email(email.trim()).await? else {
      tracing::debug!("Login attempt for unknown email");
      return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &hash) {
      tracing::debug!(user = %user.id, "Login attempt with wrong password");
      return Err(AuthError::InvalidCredentials);
    }

    let token = generate_session_token();
    let expires_at = Utc::now() + self.session_ttl;
    self
      .backend
      .create_session(user.id, &hash_session_token(&token), expires_at)
      .await?;

    tracing::info!(user = %user.id, partner = %user.partner_id, "User logged in");
    Ok(IssuedSession {
      token,
      user,
      expires_at,
    })
  }

  /// Resolve a presented token to its user; expired or unknown tokens yield `None`.
  pub async fn authenticate(&self, token: &str) -> Result<Option<User>, AuthError> {
    if token.is_empty() {
      return Ok(None);
    }
    let found = self
      .backend
      .validate_session(&hash_session_token(token))
      .await?;
    Ok(found.map(|(_, user)| user))
  }

  pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
    if let Some((session, user)) = self
      .backend
      .validate_session(&hash_session_token(token))
      .await?
    {
      self.backend.delete_session(session.id).await?;
      tracing::info!(user = %user.id, "User logged out");
    }
    Ok(())
  }

  pub async fn register(&self, input: Registration<'_>) -> Result<User, AuthError> {
    let name = input.name.trim();
    let email = input.email.trim();
    if name.is_empty() {
      return Err(ValidationError::new("name", "is required").into());
    }
    if !is_plausible_email(email) {
      return Err(ValidationError::new("email", "must be a valid email address").into());
    }
    if input.password.chars().count() < MIN_PASSWORD_LENGTH {
      return Err(
        ValidationError::new(
          "password",
          format!("must have at least {} characters", MIN_PASSWORD_LENGTH),
        )
        .into(),
      );
    }
    if self.backend.get_user_by_email(email).await?.is_some() {
      return Err(AuthError::EmailTaken);
    }

    let password_hash = hash_password(input.password).map_err(|e| AuthError::Hash(e.to_string()))?;
    let user = self
      .backend
      .create_user(NewUser {
        partner_id: input.partner_id,
        name,
        email,
        password_hash: &password_hash,
        role: input.role,
      })
      .await?;
    tracing::info!(user = %user.id, partner = %user.partner_id, role = %user.role, "User created");
    Ok(user)
  }

  /// Remove a user and every session they hold.
  pub async fn remove_user(&self, user: &User) -> Result<bool, AuthError> {
    let sessions = self.backend.delete_sessions_for_user(user.id).await?;
    let deleted = self.backend.delete_user(user.id).await?;
    tracing::info!(user = %user.id, sessions, "User removed");
    Ok(deleted)
  }
}

fn is_plausible_email(email: &str) -> bool {
  match email.split_once('@') {
    Some((local, domain)) => {
      !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
    }
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn email_plausibility() {
    assert!(is_plausible_email("ana@solar.com.br"));
    assert!(!is_plausible_email("ana"));
    assert!(!is_plausible_email("@solar.com"));
    assert!(!is_plausible_email("ana@localhost"));
    assert!(!is_plausible_email("ana maria@solar.com"));
  }
}
