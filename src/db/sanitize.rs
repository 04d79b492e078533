//! Input checks for anything that ends up spliced into SQL text.
//!
//! Values go through parameters wherever the driver allows it; the compiled
//! filter fragments cannot, so their identifiers and literals pass through here.

use thiserror::Error;

/// Maximum length for identifiers (collection names, field paths)
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Maximum length for string literals in compiled filters
pub const MAX_STRING_VALUE_LENGTH: usize = 65535;

/// Upper bound on a single page of results
pub const MAX_LIMIT: usize = 10_000;

/// Upper bound on a skip value
pub const MAX_SKIP: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SqlSanitizeError {
  #[error("Identifier cannot be empty")]
  EmptyIdentifier,
  #[error("Identifier too long: {0} > {max}", max = MAX_IDENTIFIER_LENGTH)]
  IdentifierTooLong(usize),
  #[error("Identifier must start with a letter or underscore, got '{0}'")]
  InvalidIdentifierStart(char),
  #[error("Invalid character in identifier: '{0}'")]
  InvalidIdentifierChar(char),
  #[error("Collection names must be lowercase alphanumeric, got '{0}'")]
  InvalidCollectionChar(char),
  #[error("Invalid field path: {0}")]
  InvalidFieldPath(String),
  #[error("'{0}' is a reserved SQL keyword")]
  ReservedKeyword(String),
  #[error("String too long: {0} > {max}", max = MAX_STRING_VALUE_LENGTH)]
  StringTooLong(usize),
  #[error("Null bytes not allowed in strings")]
  NullByteInString,
  #[error("Invalid numeric value: {0}")]
  InvalidNumeric(String),
  #[error("Limit {0} exceeds maximum {max}", max = MAX_LIMIT)]
  LimitTooLarge(usize),
  #[error("Skip {0} exceeds maximum {max}", max = MAX_SKIP)]
  SkipTooLarge(usize),
}

fn check_start(s: &str) -> Result<(), SqlSanitizeError> {
  if s.is_empty() {
    return Err(SqlSanitizeError::EmptyIdentifier);
  }
  if s.len() > MAX_IDENTIFIER_LENGTH {
    return Err(SqlSanitizeError::IdentifierTooLong(s.len()));
  }
  match s.chars().next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(()),
    Some(c) => Err(SqlSanitizeError::InvalidIdentifierStart(c)),
    None => Err(SqlSanitizeError::EmptyIdentifier),
  }
}

fn check_keyword(s: &str) -> Result<(), SqlSanitizeError> {
  let upper = s.to_uppercase();
  if SQL_KEYWORDS.contains(&upper.as_str()) {
    return Err(SqlSanitizeError::ReservedKeyword(s.to_string()));
  }
  Ok(())
}

/// Validates a dotted document field path such as `funnel.stage` or `idParceiro`.
///
/// Paths only ever appear inside quoted JSON path literals, so keywords are allowed.
pub fn validate_identifier(s: &str) -> Result<(), SqlSanitizeError> {
  check_start(s)?;

  if s.starts_with('.') || s.ends_with('.') || s.contains("..") {
    return Err(SqlSanitizeError::InvalidFieldPath(s.to_string()));
  }

  if let Some(c) = s
    .chars()
    .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '.')
  {
    return Err(SqlSanitizeError::InvalidIdentifierChar(c));
  }

  Ok(())
}

/// Validates a collection name: lowercase alphanumeric and underscore only.
pub fn validate_collection_name(s: &str) -> Result<(), SqlSanitizeError> {
  check_start(s)?;

  if let Some(c) = s
    .chars()
    .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit() && *c != '_')
  {
    return Err(SqlSanitizeError::InvalidCollectionChar(c));
  }

  check_keyword(s)
}

/// Escapes a string literal for standard-conforming SQL: doubles single quotes, rejects NUL.
pub fn escape_string(s: &str) -> Result<String, SqlSanitizeError> {
  if s.len() > MAX_STRING_VALUE_LENGTH {
    return Err(SqlSanitizeError::StringTooLong(s.len()));
  }

  let mut escaped = String::with_capacity(s.len() + 8);
  for c in s.chars() {
    match c {
      '\'' => escaped.push_str("''"),
      '\0' => return Err(SqlSanitizeError::NullByteInString),
      _ => escaped.push(c),
    }
  }
  Ok(escaped)
}

/// Validates a numeric literal rendered by serde_json (integers, decimals, exponents).
pub fn validate_numeric(s: &str) -> Result<(), SqlSanitizeError> {
  let body = s.strip_prefix('-').unwrap_or(s);
  let valid = !body.is_empty()
    && body.chars().next().is_some_and(|c| c.is_ascii_digit())
    && body
      .chars()
      .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    && body.matches('.').count() <= 1;
  if valid {
    Ok(())
  } else {
    Err(SqlSanitizeError::InvalidNumeric(s.to_string()))
  }
}

pub fn validate_limit(limit: usize) -> Result<(), SqlSanitizeError> {
  if limit > MAX_LIMIT {
    return Err(SqlSanitizeError::LimitTooLarge(limit));
  }
  Ok(())
}

pub fn validate_skip(skip: usize) -> Result<(), SqlSanitizeError> {
  if skip > MAX_SKIP {
    return Err(SqlSanitizeError::SkipTooLarge(skip));
  }
  Ok(())
}

const SQL_KEYWORDS: &[&str] = &[
  "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TABLE", "INDEX", "FROM",
  "WHERE", "AND", "OR", "NOT", "NULL", "TRUE", "FALSE", "ORDER", "BY", "LIMIT", "OFFSET",
  "JOIN", "UNION", "ALL", "DISTINCT", "GROUP", "HAVING", "INTO", "VALUES", "SET", "CASCADE",
  "TRIGGER", "FUNCTION", "PROCEDURE", "DATABASE", "SCHEMA", "GRANT", "REVOKE", "COMMIT",
  "ROLLBACK", "BEGIN", "TRANSACTION", "TRUNCATE", "EXECUTE", "EXEC",
];
