use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  while let Some(start) = result.find("${") {
    let Some(end) = result[start..].find('}') else {
      break;
    };
    let var_name = &result[start + 2..start + end];
    let value = std::env::var(var_name).unwrap_or_default();
    result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
  }

  // $VAR_NAME runs until the first char outside [A-Za-z0-9_]
  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let value = std::env::var(&rest[..var_len]).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += 1;
  }

  result
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
  Postgres,
  #[default]
  Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub backend: BackendType,
  #[serde(default)]
  pub postgres: PostgresSection,
  #[serde(default)]
  pub sqlite: SqliteSection,
  #[serde(default)]
  pub logging: LoggingSection,
  #[serde(default)]
  pub auth: AuthSection,
  #[serde(default)]
  pub automations: AutomationsSection,
  #[serde(default)]
  pub limits: LimitsSection,
  #[serde(default)]
  pub integrations: IntegrationsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
  /// Allowed browser origins. Empty or ["*"] is permissive.
  #[serde(default)]
  pub cors_origins: Vec<String>,
}

fn default_host() -> String {
  "0.0.0.0".into()
}
fn default_port() -> u16 {
  3000
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      cors_origins: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
  #[serde(default = "default_cookie_name")]
  pub cookie_name: String,
  #[serde(default = "default_session_ttl_days")]
  pub session_ttl_days: i64,
  /// Mark the session cookie `Secure` (HTTPS deployments)
  #[serde(default)]
  pub secure_cookie: bool,
}

fn default_cookie_name() -> String {
  "session-token".into()
}
fn default_session_ttl_days() -> i64 {
  30
}

impl Default for AuthSection {
  fn default() -> Self {
    Self {
      cookie_name: default_cookie_name(),
      session_ttl_days: default_session_ttl_days(),
      secure_cookie: false,
    }
  }
}

impl AuthSection {
  pub fn session_ttl(&self) -> chrono::Duration {
    chrono::Duration::days(self.session_ttl_days.max(1))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationsSection {
  #[serde(default = "default_true")]
  pub enabled: bool,
}

fn default_true() -> bool {
  true
}

impl Default for AutomationsSection {
  fn default() -> Self {
    Self { enabled: true }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
  #[serde(default = "default_page_size")]
  pub default_page_size: usize,
  #[serde(default = "default_max_page_size")]
  pub max_page_size: usize,
}

fn default_page_size() -> usize {
  50
}
fn default_max_page_size() -> usize {
  500
}

impl Default for LimitsSection {
  fn default() -> Self {
    Self {
      default_page_size: default_page_size(),
      max_page_size: default_max_page_size(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationsSection {
  #[serde(default)]
  pub workflows: ServiceSection,
  #[serde(default)]
  pub documents: ServiceSection,
}

/// An outbound HTTP service. Unset url disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub api_key: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

impl Default for ServiceSection {
  fn default() -> Self {
    Self {
      url: None,
      api_key: String::new(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl ServiceSection {
  /// Configured base url, if any.
  pub fn endpoint(&self) -> Option<&str> {
    self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs.max(1))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSection {
  #[serde(default = "default_pg_url")]
  pub url: String,
  #[serde(default = "default_max_conn")]
  pub max_connections: usize,
}
fn default_pg_url() -> String {
  "postgres://localhost/solarcrm".into()
}
fn default_max_conn() -> usize {
  20
}
impl Default for PostgresSection {
  fn default() -> Self {
    Self {
      url: default_pg_url(),
      max_connections: default_max_conn(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSection {
  #[serde(default = "default_sqlite_path")]
  pub path: String,
}
fn default_sqlite_path() -> String {
  "solarcrm.db".into()
}
impl Default for SqliteSection {
  fn default() -> Self {
    Self {
      path: default_sqlite_path(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}
fn default_level() -> String {
  "info".into()
}
impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl ServerConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
    Ok(serde_yaml::from_str(&expand_env_vars(content))?)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["solarcrm.yaml", "solarcrm.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expands_both_variable_forms() {
    std::env::set_var("SOLARCRM_TEST_HOST", "db.internal");
    let out = expand_env_vars("a=${SOLARCRM_TEST_HOST} b=$SOLARCRM_TEST_HOST/x");
    assert_eq!(out, "a=db.internal b=db.internal/x");
  }

  #[test]
  fn unset_variable_expands_empty() {
    assert_eq!(expand_env_vars("k=${SOLARCRM_TEST_UNSET_VAR}"), "k=");
  }

  #[test]
  fn lone_dollar_is_kept() {
    assert_eq!(expand_env_vars("price: $ 10"), "price: $ 10");
  }

  #[test]
  fn empty_document_uses_defaults() {
    let config = ServerConfig::from_yaml("{}").unwrap();
    assert_eq!(config.backend, BackendType::Sqlite);
    assert_eq!(config.address(), "0.0.0.0:3000");
    assert_eq!(config.auth.cookie_name, "session-token");
    assert_eq!(config.auth.session_ttl(), chrono::Duration::days(30));
    assert!(config.automations.enabled);
    assert!(config.integrations.workflows.endpoint().is_none());
  }

  #[test]
  fn blank_service_url_is_unconfigured() {
    let config = ServerConfig::from_yaml(
      "integrations:\n  documents:\n    url: \"  \"\n    api_key: k\n",
    )
    .unwrap();
    assert!(config.integrations.documents.endpoint().is_none());
  }
}
