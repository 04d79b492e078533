mod backend;
mod postgres;
pub mod sanitize;
mod sqlite;

pub use backend::{DatabaseBackend, NewUser, Session, SqlDialect, User, UserRole};
pub use postgres::PostgresBackend;
pub use sanitize::{
  escape_string, validate_collection_name, validate_identifier, validate_limit, validate_skip,
  SqlSanitizeError,
};
pub use sqlite::SqliteBackend;
