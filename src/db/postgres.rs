use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio::sync::broadcast;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use super::backend::{DatabaseBackend, NewUser, Session, SqlDialect, User, UserRole};
use super::sanitize::{validate_collection_name, validate_identifier, validate_limit, validate_skip};
use crate::types::{Change, ChangeOperation, Document, OrderBySpec, OrderDirection};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    collection VARCHAR(255) NOT NULL,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_partner ON documents(collection, (data->>'idParceiro'));
CREATE INDEX IF NOT EXISTS idx_documents_data ON documents USING GIN(data);

CREATE TABLE IF NOT EXISTS change_queue (
    id BIGSERIAL PRIMARY KEY,
    collection VARCHAR(255) NOT NULL,
    document_id UUID NOT NULL,
    operation VARCHAR(10) NOT NULL,
    old_data JSONB,
    new_data JSONB,
    changed_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_change_queue_collection ON change_queue(collection);

CREATE OR REPLACE FUNCTION capture_crm_changes() RETURNS TRIGGER AS $$
DECLARE
    change_id BIGINT;
BEGIN
    IF TG_OP = 'INSERT' THEN
        INSERT INTO change_queue (collection, document_id, operation, new_data)
        VALUES (NEW.collection, NEW.id, 'INSERT', NEW.data)
        RETURNING id INTO change_id;
    ELSIF TG_OP = 'UPDATE' THEN
        INSERT INTO change_queue (collection, document_id, operation, old_data, new_data)
        VALUES (NEW.collection, NEW.id, 'UPDATE', OLD.data, NEW.data)
        RETURNING id INTO change_id;
    ELSIF TG_OP = 'DELETE' THEN
        INSERT INTO change_queue (collection, document_id, operation, old_data)
        VALUES (OLD.collection, OLD.id, 'DELETE', OLD.data)
        RETURNING id INTO change_id;
    END IF;
    PERFORM pg_notify('crm_changes', change_id::text);
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS crm_changes_trigger ON documents;
CREATE TRIGGER crm_changes_trigger AFTER INSERT OR UPDATE OR DELETE ON documents FOR EACH ROW EXECUTE FUNCTION capture_crm_changes();

CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    partner_id VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    email VARCHAR(255) NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role VARCHAR(16) NOT NULL DEFAULT 'user',
    created_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_users_partner ON users(partner_id);

CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash VARCHAR(64) NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token_hash);
"#;

const DOC_COLUMNS: &str = "id, collection, data, created_at, updated_at";
const CHANGE_COLUMNS: &str =
  "id, collection, document_id, operation, old_data, new_data, changed_at";

pub struct PostgresBackend {
  pool: Pool,
  url: String,
  change_tx: broadcast::Sender<Change>,
}

impl PostgresBackend {
  pub fn new(url: &str, max_connections: usize) -> Result<Self, anyhow::Error> {
    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    let (change_tx, _) = broadcast::channel(4096);
    Ok(Self {
      pool,
      url: url.into(),
      change_tx,
    })
  }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
  fn dialect(&self) -> SqlDialect {
    SqlDialect::Postgres
  }

  async fn init_schema(&self) -> Result<(), anyhow::Error> {
    self.pool.get().await?.batch_execute(SCHEMA).await?;
    tracing::info!("PostgreSQL schema initialized");
    Ok(())
  }

  async fn drop_schema(&self) -> Result<(), anyhow::Error> {
    self
      .pool
      .get()
      .await?
      .batch_execute(
        "DROP TRIGGER IF EXISTS crm_changes_trigger ON documents;
       DROP FUNCTION IF EXISTS capture_crm_changes();
       DROP TABLE IF EXISTS sessions; DROP TABLE IF EXISTS users;
       DROP TABLE IF EXISTS change_queue; DROP TABLE IF EXISTS documents;",
      )
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
    self.pool.get().await?.execute(
      "INSERT INTO documents (id, collection, data, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
      &[&id, &collection, &data, &now, &now],
    ).await?;
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

    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        &format!(
          "SELECT {} FROM documents WHERE collection = $1 AND id = $2",
          DOC_COLUMNS
        ),
        &[&collection, &id],
      )
      .await?;
    Ok(row.as_ref().map(row_to_doc))
  }

  async fn update(
    &self,
    collection: &str,
    id: Uuid,
    data: serde_json::Value,
  ) -> Result<Option<Document>, anyhow::Error> {
    validate_collection_name(collection)?;

    let now = Utc::now();
    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        &format!(
          "UPDATE documents SET data = $1, updated_at = $2 WHERE collection = $3 AND id = $4 RETURNING {}",
          DOC_COLUMNS
        ),
        &[&data, &now, &collection, &id],
      )
      .await?;
    Ok(row.as_ref().map(row_to_doc))
  }

  async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, anyhow::Error> {
    validate_collection_name(collection)?;

    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        &format!(
          "DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING {}",
          DOC_COLUMNS
        ),
        &[&collection, &id],
      )
      .await?;
    Ok(row.as_ref().map(row_to_doc))
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

    let mut sql = format!(
      "SELECT {} FROM documents WHERE collection = $1",
      DOC_COLUMNS
    );

    // Filter is pre-validated by the filter compiler
    if let Some(f) = filter {
      sql.push_str(" AND ");
      sql.push_str(f);
    }

    match order {
      Some(o) => {
        validate_identifier(&o.field)?;
        let dir = if o.direction == OrderDirection::Desc {
          "DESC"
        } else {
          "ASC"
        };
        sql.push_str(&format!(
          " ORDER BY {} {}, created_at DESC",
          SqlDialect::Postgres.json_text(&o.field),
          dir
        ));
      }
      None => sql.push_str(" ORDER BY created_at DESC"),
    }

    if let Some(l) = limit {
      validate_limit(l)?;
      sql.push_str(&format!(" LIMIT {}", l));
    }
    if let Some(o) = offset {
      validate_skip(o)?;
      sql.push_str(&format!(" OFFSET {}", o));
    }

    let rows = self.pool.get().await?.query(&sql, &[&collection]).await?;
    Ok(rows.iter().map(row_to_doc).collect())
  }

  async fn ping(&self) -> Result<(), anyhow::Error> {
    self.pool.get().await?.query_one("SELECT 1", &[]).await?;
    Ok(())
  }

  fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
    self.change_tx.subscribe()
  }

  async fn start_change_listener(&self) -> Result<(), anyhow::Error> {
    let (tx_notifications, mut rx_notifications) = tokio::sync::mpsc::unbounded_channel::<i64>();

    // Dedicated connection for LISTEN
    let (listen_client, mut listen_connection) = tokio_postgres::connect(&self.url, NoTls).await?;

    tokio::spawn(async move {
      loop {
        match futures_util::future::poll_fn(|cx| listen_connection.poll_message(cx)).await {
          Some(Ok(tokio_postgres::AsyncMessage::Notification(n))) => {
            if let Ok(change_id) = n.payload().parse::<i64>() {
              let _ = tx_notifications.send(change_id);
            }
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            tracing::error!("PostgreSQL notification error: {}", e);
            break;
          }
          None => break,
        }
      }
    });

    listen_client.execute("LISTEN crm_changes", &[]).await?;

    // Only changes made after startup are published
    let start_id: i64 = self
      .pool
      .get()
      .await?
      .query_one("SELECT COALESCE(MAX(id), 0) FROM change_queue", &[])
      .await?
      .get(0);
    tracing::info!(start_id, "PostgreSQL LISTEN/NOTIFY change listener started");

    let tx = self.change_tx.clone();
    let pool = self.pool.clone();

    tokio::spawn(async move {
      // Keeps the LISTEN session alive for the lifetime of the task
      let _listen_client = listen_client;
      let mut last_id = start_id;

      loop {
        tokio::select! {
          Some(change_id) = rx_notifications.recv() => {
            if change_id <= last_id {
              continue;
            }
            let Ok(conn) = pool.get().await else { continue };
            let Ok(rows) = conn.query(
              &format!("SELECT {} FROM change_queue WHERE id > $1 AND id <= $2 ORDER BY id", CHANGE_COLUMNS),
              &[&last_id, &change_id]
            ).await else { continue };

            for row in rows {
              if let Some(change) = row_to_change(&row) {
                last_id = change.id;
                let _ = tx.send(change);
              }
            }
          }
          // Fallback polling for missed notifications
          _ = tokio::time::sleep(tokio::time::Duration::from_secs(5)) => {
            let Ok(conn) = pool.get().await else { continue };
            let Ok(rows) = conn.query(
              &format!("SELECT {} FROM change_queue WHERE id > $1 ORDER BY id LIMIT 100", CHANGE_COLUMNS),
              &[&last_id]
            ).await else { continue };

            for row in rows {
              if let Some(change) = row_to_change(&row) {
                last_id = change.id;
                let _ = tx.send(change);
              }
            }
          }
        }
      }
    });

    let cleanup_pool = self.pool.clone();
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        let Ok(conn) = cleanup_pool.get().await else {
          continue;
        };
        let result = conn.execute(
          "DELETE FROM change_queue WHERE id < (SELECT MAX(id) - 10000 FROM change_queue) AND changed_at < NOW() - INTERVAL '1 hour'",
          &[]
        ).await;
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
    let id = Uuid::new_v4();
    let now = Utc::now();
    let email = user.email.to_lowercase();
    let role = user.role.to_string();
    self
      .pool
      .get()
      .await?
      .execute(
        "INSERT INTO users (id, partner_id, name, email, password_hash, role, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        &[&id, &user.partner_id, &user.name, &email, &user.password_hash, &role, &now],
      )
      .await?;
    Ok(User {
      id,
      partner_id: user.partner_id.into(),
      name: user.name.into(),
      email,
      role: user.role,
      created_at: now,
    })
  }

  async fn get_user_by_email(
    &self,
    email: &str,
  ) -> Result<Option<(User, String)>, anyhow::Error> {
    let email = email.to_lowercase();
    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        "SELECT id, partner_id, name, email, role, created_at, password_hash FROM users WHERE email = $1",
        &[&email],
      )
      .await?;
    Ok(row.map(|r| (row_to_user(&r), r.get(6))))
  }

  async fn get_user(&self, id: Uuid) -> Result<Option<User>, anyhow::Error> {
    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        "SELECT id, partner_id, name, email, role, created_at FROM users WHERE id = $1",
        &[&id],
      )
      .await?;
    Ok(row.as_ref().map(row_to_user))
  }

  async fn list_users(&self, partner_id: Option<&str>) -> Result<Vec<User>, anyhow::Error> {
    let rows = self
      .pool
      .get()
      .await?
      .query(
        "SELECT id, partner_id, name, email, role, created_at FROM users WHERE ($1::text IS NULL OR partner_id = $1) ORDER BY name",
        &[&partner_id],
      )
      .await?;
    Ok(rows.iter().map(row_to_user).collect())
  }

  async fn delete_user(&self, id: Uuid) -> Result<bool, anyhow::Error> {
    let result = self
      .pool
      .get()
      .await?
      .execute("DELETE FROM users WHERE id = $1", &[&id])
      .await?;
    Ok(result > 0)
  }

  async fn create_session(
    &self,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
  ) -> Result<Session, anyhow::Error> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    self
      .pool
      .get()
      .await?
      .execute(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES ($1, $2, $3, $4, $5)",
        &[&id, &user_id, &token_hash, &expires_at, &now],
      )
      .await?;
    Ok(Session {
      id,
      user_id,
      expires_at,
      created_at: now,
    })
  }

  async fn validate_session(
    &self,
    token_hash: &str,
  ) -> Result<Option<(Session, User)>, anyhow::Error> {
    let row = self
      .pool
      .get()
      .await?
      .query_opt(
        "SELECT u.id, u.partner_id, u.name, u.email, u.role, u.created_at,
                s.id, s.user_id, s.expires_at, s.created_at
         FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.token_hash = $1 AND s.expires_at > NOW()",
        &[&token_hash],
      )
      .await?;
    Ok(row.map(|r| {
      let session = Session {
        id: r.get(6),
        user_id: r.get(7),
        expires_at: r.get(8),
        created_at: r.get(9),
      };
      (session, row_to_user(&r))
    }))
  }

  async fn delete_session(&self, id: Uuid) -> Result<bool, anyhow::Error> {
    let result = self
      .pool
      .get()
      .await?
      .execute("DELETE FROM sessions WHERE id = $1", &[&id])
      .await?;
    Ok(result > 0)
  }

  async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, anyhow::Error> {
    Ok(
      self
        .pool
        .get()
        .await?
        .execute("DELETE FROM sessions WHERE user_id = $1", &[&user_id])
        .await?,
    )
  }

  async fn cleanup_expired_sessions(&self) -> Result<u64, anyhow::Error> {
    Ok(
      self
        .pool
        .get()
        .await?
        .execute("DELETE FROM sessions WHERE expires_at <= NOW()", &[])
        .await?,
    )
  }
}

fn row_to_doc(r: &Row) -> Document {
  Document {
    id: r.get(0),
    collection: r.get(1),
    data: r.get(2),
    created_at: r.get(3),
    updated_at: r.get(4),
  }
}

/// Expects the user columns first, in `id, partner_id, name, email, role, created_at` order.
fn row_to_user(r: &Row) -> User {
  let role: String = r.get(4);
  User {
    id: r.get(0),
    partner_id: r.get(1),
    name: r.get(2),
    email: r.get(3),
    role: role.parse().unwrap_or(UserRole::User),
    created_at: r.get(5),
  }
}

fn row_to_change(r: &Row) -> Option<Change> {
  let operation = r.get::<_, String>(3).parse::<ChangeOperation>().ok()?;
  Some(Change {
    id: r.get(0),
    collection: r.get(1),
    document_id: r.get(2),
    operation,
    old_data: r.get(4),
    new_data: r.get(5),
    changed_at: r.get(6),
  })
}
