use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension};
use tokio::sync::broadcast;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use super::backend::{DatabaseBackend, NewUser, Session, SqlDialect, User, UserRole};
use super::sanitize::{validate_collection_name, validate_identifier, validate_limit, validate_skip};
use crate::types::{Change, ChangeOperation, Document, OrderBySpec, OrderDirection};

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
"#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_partner
    ON documents(collection, json_extract(data, '$.idParceiro'));

CREATE TABLE IF NOT EXISTS change_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    document_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    old_data TEXT,
    new_data TEXT,
    changed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_change_queue_collection ON change_queue(collection);

CREATE TRIGGER IF NOT EXISTS documents_insert AFTER INSERT ON documents BEGIN
    INSERT INTO change_queue (collection, document_id, operation, new_data, changed_at)
    VALUES (NEW.collection, NEW.id, 'INSERT', NEW.data, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS documents_update AFTER UPDATE ON documents BEGIN
    INSERT INTO change_queue (collection, document_id, operation, old_data, new_data, changed_at)
    VALUES (NEW.collection, NEW.id, 'UPDATE', OLD.data, NEW.data, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TRIGGER IF NOT EXISTS documents_delete AFTER DELETE ON documents BEGIN
    INSERT INTO change_queue (collection, document_id, operation, old_data, changed_at)
    VALUES (OLD.collection, OLD.id, 'DELETE', OLD.data, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
END;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    partner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created_at TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_users_partner ON users(partner_id);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token_hash);
"#;

const DOC_COLUMNS: &str = "id, collection, data, created_at, updated_at";
const USER_COLUMNS: &str = "id, partner_id, name, email, role, created_at";

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Name of the Unicode-aware lowercase function registered on every connection.
pub const FOLD_FUNCTION: &str = "crm_fold";

/// `lower()` only folds ASCII; pattern operators need `JOÃO` to match `joão`.
fn fold_text(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
  Ok(match ctx.get_raw(0) {
    ValueRef::Text(bytes) => Some(
      std::str::from_utf8(bytes)
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?
        .to_lowercase(),
    ),
    ValueRef::Integer(i) => Some(i.to_string()),
    ValueRef::Real(f) => Some(f.to_string()),
    ValueRef::Null | ValueRef::Blob(_) => None,
  })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .map(|d| d.with_timezone(&Utc))
    .unwrap_or_else(|_| Utc::now())
}

pub struct SqliteBackend {
  conn: Connection,
  change_tx: broadcast::Sender<Change>,
}

impl SqliteBackend {
  pub async fn new(path: &str) -> Result<Self, anyhow::Error> {
    let conn = if path == ":memory:" {
      Connection::open_in_memory().await?
    } else {
      Connection::open(path).await?
    };

    conn
      .call(|conn| conn.execute_batch(PRAGMAS).map_err(|e| e.into()))
      .await?;
    conn
      .call(|conn| {
        conn
          .create_scalar_function(
            FOLD_FUNCTION,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            fold_text,
          )
          .map_err(|e| e.into())
      })
      .await?;

    let (change_tx, _) = broadcast::channel(4096);
    Ok(Self { conn, change_tx })
  }

  pub async fn in_memory() -> Result<Self, anyhow::Error> {
    Self::new(":memory:").await
  }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
  fn dialect(&self) -> SqlDialect {
    SqlDialect::Sqlite
  }

  async fn init_schema(&self) -> Result<(), anyhow::Error> {
    self
      .conn
      .call(|conn| conn.execute_batch(SCHEMA).map_err(|e| e.into()))
      .await?;
    tracing::info!("SQLite schema initialized");
    Ok(())
  }

  async fn drop_schema(&self) -> Result<(), anyhow::Error> {
    self
      .conn
      .call(|conn| {
        conn
          .execute_batch(
            "DROP TRIGGER IF EXISTS documents_insert;
             DROP TRIGGER IF EXISTS documents_update;
             DROP TRIGGER IF EXISTS documents_delete;
             DROP TABLE IF EXISTS sessions;
             DROP TABLE IF EXISTS users;
             DROP TABLE IF EXISTS change_queue;
             DROP TABLE IF EXISTS documents;",
          )
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  async fn insert(
    &self,
    collection: &str,
    data: serde_json::Value,
  ) -> Result<Document, anyhow::Error> {
    validate_collection_name(collection)?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let data_str = serde_json::to_string(&data)?;
    let now_str = ts(now);
    let col = collection.to_string();
    let id_str = id.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO documents (id, collection, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id_str, col, data_str, now_str],
          )
          .map_err(|e| e.into())
      })
      .await?;

    Ok(Document {
      id,
      collection: collection.into(),
      data,
      created_at: now,
      updated_at: now,
    })
  }

  async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, anyhow::Error> {
    validate_collection_name(collection)?;

    let col = collection.to_string();
    let id_str = id.to_string();

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {} FROM documents WHERE collection = ?1 AND id = ?2",
          DOC_COLUMNS
        ))?;
        Ok(stmt.query_row(params![col, id_str], row_to_doc).optional()?)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn update(
    &self,
    collection: &str,
    id: Uuid,
    data: serde_json::Value,
  ) -> Result<Option<Document>, anyhow::Error> {
    validate_collection_name(collection)?;

    let col = collection.to_string();
    let id_str = id.to_string();
    let data_str = serde_json::to_string(&data)?;
    let now_str = ts(Utc::now());

    self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE documents SET data = ?1, updated_at = ?2 WHERE collection = ?3 AND id = ?4",
          params![data_str, now_str, col, id_str],
        )?;
        if changed == 0 {
          return Ok(None);
        }
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {} FROM documents WHERE id = ?1",
          DOC_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id_str], row_to_doc).optional()?)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, anyhow::Error> {
    validate_collection_name(collection)?;

    let col = collection.to_string();
    let id_str = id.to_string();

    self
      .conn
      .call(move |conn| {
        let doc = {
          let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM documents WHERE collection = ?1 AND id = ?2",
            DOC_COLUMNS
          ))?;
          stmt
            .query_row(params![col, id_str], row_to_doc)
            .optional()?
        };
        if doc.is_some() {
          conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![col, id_str],
          )?;
        }
        Ok(doc)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn list(
    &self,
    collection: &str,
    filter: Option<&str>,
    order: Option<&OrderBySpec>,
    limit: Option<usize>,
    offset: Option<usize>,
  ) -> Result<Vec<Document>, anyhow::Error> {
    validate_collection_name(collection)?;
    if let Some(o) = order {
      validate_identifier(&o.field)?;
    }
    if let Some(l) = limit {
      validate_limit(l)?;
    }
    if let Some(o) = offset {
      validate_skip(o)?;
    }

    let col = collection.to_string();
    let mut sql = String::with_capacity(256);
    sql.push_str(&format!(
      "SELECT {} FROM documents WHERE collection = ?1",
      DOC_COLUMNS
    ));

    // Filter is pre-validated by the filter compiler
    if let Some(f) = filter {
      sql.push_str(" AND ");
      sql.push_str(f);
    }

    match order {
      Some(o) => {
        let dir = if o.direction == OrderDirection::Desc {
          "DESC"
        } else {
          "ASC"
        };
        sql.push_str(&format!(
          " ORDER BY {} {}, created_at DESC",
          SqlDialect::Sqlite.json_text(&o.field),
          dir
        ));
      }
      None => sql.push_str(" ORDER BY created_at DESC"),
    }

    // SQLite needs a LIMIT before OFFSET
    match (limit, offset) {
      (Some(l), Some(o)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", l, o)),
      (Some(l), None) => sql.push_str(&format!(" LIMIT {}", l)),
      (None, Some(o)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", o)),
      (None, None) => {}
    }

    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![col])?;
        let mut docs = Vec::with_capacity(limit.unwrap_or(64));
        while let Some(row) = rows.next()? {
          docs.push(row_to_doc(row)?);
        }
        Ok(docs)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn ping(&self) -> Result<(), anyhow::Error> {
    self
      .conn
      .call(|conn| {
        conn
          .query_row("SELECT 1", [], |_| Ok(()))
          .map_err(|e| e.into())
      })
      .await?;
    Ok(())
  }

  fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
    self.change_tx.subscribe()
  }

  async fn start_change_listener(&self) -> Result<(), anyhow::Error> {
    let tx = self.change_tx.clone();
    let conn = self.conn.clone();

    // Only changes made after startup are published
    let start_id: i64 = conn
      .call(|conn| {
        conn
          .query_row("SELECT COALESCE(MAX(id), 0) FROM change_queue", [], |r| {
            r.get(0)
          })
          .map_err(|e| e.into())
      })
      .await?;
    tracing::info!(start_id, "SQLite change listener started");

    tokio::spawn(async move {
      let mut last_id = start_id;
      loop {
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        let lid = last_id;
        let changes: Result<Vec<Change>, _> = conn
          .call(move |conn| {
            let mut stmt = conn.prepare_cached(
              "SELECT id, collection, document_id, operation, old_data, new_data, changed_at FROM change_queue WHERE id > ?1 ORDER BY id LIMIT 100",
            )?;
            let mut rows = stmt.query(params![lid])?;
            let mut changes = Vec::new();
            while let Some(row) = rows.next()? {
              let op_str: String = row.get(3)?;
              let Ok(operation) = op_str.parse::<ChangeOperation>() else {
                continue;
              };
              let old_data: Option<String> = row.get(4)?;
              let new_data: Option<String> = row.get(5)?;
              let changed_at: String = row.get(6)?;
              changes.push(Change {
                id: row.get(0)?,
                collection: row.get(1)?,
                document_id: row.get::<_, String>(2)?.parse().unwrap_or_default(),
                operation,
                old_data: old_data.and_then(|s| serde_json::from_str(&s).ok()),
                new_data: new_data.and_then(|s| serde_json::from_str(&s).ok()),
                changed_at: parse_ts(&changed_at),
              });
            }
            Ok(changes)
          })
          .await;

        match changes {
          Ok(changes) => {
            for change in changes {
              last_id = change.id;
              let _ = tx.send(change);
            }
          }
          Err(e) => tracing::warn!("Change queue poll failed: {}", e),
        }
      }
    });

    // Keep the change queue bounded
    let cleanup_conn = self.conn.clone();
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        let result: Result<usize, _> = cleanup_conn
          .call(|conn| {
            conn
              .execute(
                "DELETE FROM change_queue WHERE id < (SELECT MAX(id) - 10000 FROM change_queue)",
                [],
              )
              .map_err(|e| e.into())
          })
          .await;
        if let Ok(count) = result {
          if count > 0 {
            tracing::debug!("Cleaned up {} old change_queue entries", count);
          }
        }
      }
    });

    Ok(())
  }

  async fn create_user(&self, user: NewUser<'_>) -> Result<User, anyhow::Error> {
    let created = User {
      id: Uuid::new_v4(),
      partner_id: user.partner_id.to_string(),
      name: user.name.to_string(),
      email: user.email.to_lowercase(),
      role: user.role,
      created_at: Utc::now(),
    };
    let row = created.clone();
    let hash = user.password_hash.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO users (id, partner_id, name, email, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
              row.id.to_string(),
              row.partner_id,
              row.name,
              row.email,
              hash,
              row.role.to_string(),
              ts(row.created_at)
            ],
          )
          .map_err(|e| e.into())
      })
      .await?;

    Ok(created)
  }

  async fn get_user_by_email(
    &self,
    email: &str,
  ) -> Result<Option<(User, String)>, anyhow::Error> {
    let email = email.to_lowercase();
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {}, password_hash FROM users WHERE email = ?1",
          USER_COLUMNS
        ))?;
        Ok(
          stmt
            .query_row(params![email], |row| Ok((row_to_user(row)?, row.get(6)?)))
            .optional()?,
        )
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn get_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error> {
    let id_str = id.to_string();
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {} FROM users WHERE id = ?1",
          USER_COLUMNS
        ))?;
        Ok(stmt.query_row(params![id_str], row_to_user).optional()?)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn list_users(&self, partner_id: Option<&str>) -> Result<Vec<User>, anyhow::Error> {
    let partner = partner_id.map(str::to_string);
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT {} FROM users WHERE (?1 IS NULL OR partner_id = ?1) ORDER BY name",
          USER_COLUMNS
        ))?;
        let users = stmt
          .query_map(params![partner], row_to_user)?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn delete_user(&self, id: Uuid) -> Result<bool, anyhow::Error> {
    let id_str = id.to_string();
    let deleted: usize = self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM users WHERE id = ?1", params![id_str])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn create_session(
    &self,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<Session, anyhow::Error> {
    let session = Session {
      id: Uuid::new_v4(),
      user_id,
      expires_at,
      created_at: Utc::now(),
    };
    let row = session.clone();
    let hash = token_hash.to_string();

    self
      .conn
      .call(move |conn| {
        conn
          .execute(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
              row.id.to_string(),
              row.user_id.to_string(),
              hash,
              ts(row.expires_at),
              ts(row.created_at)
            ],
          )
          .map_err(|e| e.into())
      })
      .await?;

    Ok(session)
  }

  async fn validate_session(
    &self,
    token_hash: &str,
  ) -> Result<Option<(Session, User)>, anyhow::Error> {
    let hash = token_hash.to_string();
    let now = ts(Utc::now());
    self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT s.id, s.user_id, s.expires_at, s.created_at,
                  u.id, u.partner_id, u.name, u.email, u.role, u.created_at
           FROM sessions s JOIN users u ON u.id = s.user_id
           WHERE s.token_hash = ?1 AND s.expires_at > ?2",
        )?;
        let found = stmt
          .query_row(params![hash, now], |row| {
            let session = Session {
              id: row.get::<_, String>(0)?.parse().unwrap_or_default(),
              user_id: row.get::<_, String>(1)?.parse().unwrap_or_default(),
              expires_at: parse_ts(&row.get::<_, String>(2)?),
              created_at: parse_ts(&row.get::<_, String>(3)?),
            };
            let user = User {
              id: row.get::<_, String>(4)?.parse().unwrap_or_default(),
              partner_id: row.get(5)?,
              name: row.get(6)?,
              email: row.get(7)?,
              role: row
                .get::<_, String>(8)?
                .parse()
                .unwrap_or(UserRole::User),
              created_at: parse_ts(&row.get::<_, String>(9)?),
            };
            Ok((session, user))
          })
          .optional()?;
        Ok(found)
      })
      .await
      .map_err(|e| anyhow::anyhow!("{}", e))
  }

  async fn delete_session(&self, id: Uuid) -> Result<bool, anyhow::Error> {
    let id_str = id.to_string();
    let deleted: usize = self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM sessions WHERE id = ?1", params![id_str])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, anyhow::Error> {
    let id_str = user_id.to_string();
    let deleted: usize = self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM sessions WHERE user_id = ?1", params![id_str])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(deleted as u64)
  }

  async fn cleanup_expired_sessions(&self) -> Result<u64, anyhow::Error> {
    let now = ts(Utc::now());
    let deleted: usize = self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(deleted as u64)
  }
}

fn row_to_doc(row: &rusqlite::Row) -> Result<Document, rusqlite::Error> {
  let id_str: String = row.get(0)?;
  let data_str: String = row.get(2)?;
  let created_str: String = row.get(3)?;
  let updated_str: String = row.get(4)?;
  Ok(Document {
    id: id_str.parse().unwrap_or_default(),
    collection: row.get(1)?,
    data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
    created_at: parse_ts(&created_str),
    updated_at: parse_ts(&updated_str),
  })
}

fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
  let id_str: String = row.get(0)?;
  let role_str: String = row.get(4)?;
  let created_str: String = row.get(5)?;
  Ok(User {
    id: id_str.parse().unwrap_or_default(),
    partner_id: row.get(1)?,
    name: row.get(2)?,
    email: row.get(3)?,
    role: role_str.parse().unwrap_or(UserRole::User),
    created_at: parse_ts(&created_str),
  })
}
