use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::sqlite::FOLD_FUNCTION;
use crate::types::{Change, Document, OrderBySpec};

/// SQL dialect for query compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
  Postgres,
  Sqlite,
}

impl SqlDialect {
  /// Generate SQL for accessing a JSON field as text
  pub fn json_text(&self, field: &str) -> String {
    match self {
      Self::Postgres => format!("data{}", Self::pg_path(field, "->>")),
      Self::Sqlite => format!("json_extract(data, '{}')", Self::sqlite_path(field)),
    }
  }

  /// Generate SQL for accessing a JSON field as a number; NULL unless the value is a number.
  pub fn json_numeric(&self, field: &str) -> String {
    match self {
      Self::Postgres => {
        let value = format!("data{}", Self::pg_path(field, "->"));
        format!(
          "CASE WHEN jsonb_typeof({v}) = 'number' THEN ({v})::numeric END",
          v = value
        )
      }
      Self::Sqlite => {
        let path = Self::sqlite_path(field);
        format!(
          "CASE WHEN json_type(data, '{p}') IN ('integer', 'real') THEN json_extract(data, '{p}') END",
          p = path
        )
      }
    }
  }

  /// Generate SQL for accessing a JSON field as a boolean; NULL unless the value is a boolean.
  pub fn json_bool(&self, field: &str) -> String {
    match self {
      Self::Postgres => {
        let value = format!("data{}", Self::pg_path(field, "->"));
        format!(
          "CASE WHEN jsonb_typeof({v}) = 'boolean' THEN ({v})::boolean END",
          v = value
        )
      }
      Self::Sqlite => {
        let path = Self::sqlite_path(field);
        format!(
          "CASE WHEN json_type(data, '{p}') IN ('true', 'false') THEN json_extract(data, '{p}') END",
          p = path
        )
      }
    }
  }

  /// Case-insensitive LIKE against an escaped, lowercased pattern.
  pub fn ilike(&self, expr: &str, pattern: &str) -> String {
    match self {
      Self::Postgres => format!("{} ILIKE '{}' ESCAPE '\\'", expr, pattern),
      Self::Sqlite => format!("{}({}) LIKE '{}' ESCAPE '\\'", FOLD_FUNCTION, expr, pattern),
    }
  }

  /// Postgres path for a dotted field: `a.0.c` -> `->'a'->0->>'c'`
  fn pg_path(field: &str, last_op: &str) -> String {
    let parts: Vec<&str> = field.split('.').collect();
    let mut path = String::new();
    for (i, part) in parts.iter().enumerate() {
      let op = if i == parts.len() - 1 { last_op } else { "->" };
      match part.parse::<usize>() {
        Ok(index) => path.push_str(&format!("{}{}", op, index)),
        Err(_) => path.push_str(&format!("{}'{}'", op, part)),
      }
    }
    path
  }

  /// SQLite JSON path for a dotted field: `a.0.c` -> `$.a[0].c`
  fn sqlite_path(field: &str) -> String {
    let mut path = String::from("$");
    for part in field.split('.') {
      match part.parse::<usize>() {
        Ok(index) => path.push_str(&format!("[{}]", index)),
        Err(_) => {
          path.push('.');
          path.push_str(part);
        }
      }
    }
    path
  }
}

/// Access level of a CRM user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
  User,
  Manager,
  Admin,
}

impl std::fmt::Display for UserRole {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::User => "user",
      Self::Manager => "manager",
      Self::Admin => "admin",
    };
    f.write_str(s)
  }
}

impl std::str::FromStr for UserRole {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "user" => Ok(Self::User),
      "manager" => Ok(Self::Manager),
      "admin" => Ok(Self::Admin),
      _ => Err(format!("Unknown role: {}", s)),
    }
  }
}

/// A CRM user (without the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: Uuid,
  #[serde(rename = "idParceiro")]
  pub partner_id: String,
  pub name: String,
  pub email: String,
  pub role: UserRole,
  pub created_at: DateTime<Utc>,
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
  pub partner_id: &'a str,
  pub name: &'a str,
  pub email: &'a str,
  pub password_hash: &'a str,
  pub role: UserRole,
}

/// A login session (the token itself is never stored)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
  pub id: Uuid,
  pub user_id: Uuid,
  pub expires_at: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

/// Abstract database backend
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
  fn dialect(&self) -> SqlDialect;

  async fn init_schema(&self) -> Result<(), anyhow::Error>;
  async fn drop_schema(&self) -> Result<(), anyhow::Error>;

  async fn insert(
    &self,
    collection: &str,
    data: serde_json::Value,
  ) -> Result<Document, anyhow::Error>;
  async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, anyhow::Error>;
  async fn update(
    &self,
    collection: &str,
    id: Uuid,
    data: serde_json::Value,
  ) -> Result<Option<Document>, anyhow::Error>;
  async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, anyhow::Error>;

  /// List documents; `filter` is a SQL fragment produced by the filter compiler.
  async fn list(
    &self,
    collection: &str,
    filter: Option<&str>,
    order: Option<&OrderBySpec>,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> Result<Vec<Document>, anyhow::Error>;

  /// Liveness check against the database
  async fn ping(&self) -> Result<(), anyhow::Error>;

  fn subscribe_changes(&self) -> broadcast::Receiver<Change>;
  async fn start_change_listener(&self) -> Result<(), anyhow::Error>;

  // Users
  async fn create_user(&self, user: NewUser<'_>) -> Result<User, anyhow::Error>;
  /// Look up a user by email, returning the password hash alongside
  async fn get_user_by_email(&self, email: &str)
    -> Result<Option<(User, String)>, anyhow::Error>;
  async fn get_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error>;
  /// List users, optionally restricted to one partner
  async fn list_users(&self, partner_id: Option<&str>) -> Result<Vec<User>, anyhow::Error>;
  async fn delete_user(&self, id: Uuid) -> Result<bool, anyhow::Error>;

  // Sessions
  async fn create_session(
    &self,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<Session, anyhow::Error>;
  /// Resolve an unexpired session and its user
  async fn validate_session(
    &self,
    token_hash: &str,
  ) -> Result<Option<(Session, User)>, anyhow::Error>;
  async fn delete_session(&self, id: Uuid) -> Result<bool, anyhow::Error>;
  async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, anyhow::Error>;
  async fn cleanup_expired_sessions(&self) -> Result<u64, anyhow::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn postgres_nested_paths() {
    let d = SqlDialect::Postgres;
    assert_eq!(d.json_text("status"), "data->>'status'");
    assert_eq!(d.json_text("funnel.stage"), "data->'funnel'->>'stage'");
    assert_eq!(d.json_text("responsibles.0.id"), "data->'responsibles'->0->>'id'");
    assert_eq!(
      d.json_numeric("value"),
      "CASE WHEN jsonb_typeof(data->'value') = 'number' THEN (data->'value')::numeric END"
    );
  }

  #[test]
  fn sqlite_paths() {
    let d = SqlDialect::Sqlite;
    assert_eq!(d.json_text("funnel.stage"), "json_extract(data, '$.funnel.stage')");
    assert_eq!(
      d.json_text("responsibles.0.id"),
      "json_extract(data, '$.responsibles[0].id')"
    );
    assert_eq!(
      d.json_numeric("total"),
      "CASE WHEN json_type(data, '$.total') IN ('integer', 'real') THEN json_extract(data, '$.total') END"
    );
    assert!(d.json_bool("active").starts_with("CASE WHEN json_type(data, '$.active') IN ('true', 'false')"));
  }

  #[test]
  fn role_ordering_and_parsing() {
    assert!(UserRole::Admin > UserRole::Manager);
    assert!(UserRole::Manager > UserRole::User);
    assert_eq!("MANAGER".parse::<UserRole>().unwrap(), UserRole::Manager);
    assert!("owner".parse::<UserRole>().is_err());
    assert_eq!(UserRole::Admin.to_string(), "admin");
  }
}
