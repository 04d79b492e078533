use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use solarcrm::db::{DatabaseBackend, NewUser, SqlDialect, SqliteBackend, UserRole};
use solarcrm::query::StructuredCompiler;
use solarcrm::types::{ChangeOperation, OrderBySpec, OrderDirection, StructuredFilter};

async fn backend() -> SqliteBackend {
  let backend = SqliteBackend::in_memory().await.unwrap();
  backend.init_schema().await.unwrap();
  backend
}

#[tokio::test]
async fn test_init_schema_is_idempotent() {
  let backend = backend().await;
  backend.init_schema().await.unwrap();
  assert_eq!(backend.dialect(), SqlDialect::Sqlite);
  backend.ping().await.unwrap();
}

#[tokio::test]
async fn test_insert_get_update_delete() {
  let backend = backend().await;

  let doc = backend
    .insert("clients", json!({"name": "Ana", "idParceiro": "p1"}))
    .await
    .unwrap();
  assert_eq!(doc.collection, "clients");

  let fetched = backend.get("clients", doc.id).await.unwrap().unwrap();
  assert_eq!(fetched.data["name"], "Ana");

  // wrong collection is a miss
  assert!(backend.get("projects", doc.id).await.unwrap().is_none());

  let updated = backend
    .update("clients", doc.id, json!({"name": "Ana Paula", "idParceiro": "p1"}))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(updated.data["name"], "Ana Paula");
  assert!(updated.updated_at >= doc.updated_at);

  let deleted = backend.delete("clients", doc.id).await.unwrap().unwrap();
  assert_eq!(deleted.id, doc.id);
  assert!(backend.get("clients", doc.id).await.unwrap().is_none());
  assert!(backend.delete("clients", doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_with_filter_order_and_paging() {
  let backend = backend().await;
  for (name, power) in [("a", 4.5), ("b", 12.0), ("c", 8.0), ("d", 2.0)] {
    backend
      .insert("proposals", json!({"name": name, "power": power}))
      .await
      .unwrap();
  }

  let compiler = StructuredCompiler::new(SqlDialect::Sqlite);
  let sql = compiler
    .filter_to_sql(&serde_json::from_value::<StructuredFilter>(json!({"power": {"$gte": 4}})).unwrap())
    .unwrap();
  let order = OrderBySpec {
    field: "power".into(),
    direction: OrderDirection::Desc,
  };

  let docs = backend
    .list("proposals", Some(&sql), Some(&order), None, None)
    .await
    .unwrap();
  let names: Vec<_> = docs.iter().map(|d| d.data["name"].as_str().unwrap()).collect();
  assert_eq!(names, ["b", "c", "a"]);

  let page = backend
    .list("proposals", None, Some(&order), Some(2), Some(1))
    .await
    .unwrap();
  let names: Vec<_> = page.iter().map(|d| d.data["name"].as_str().unwrap()).collect();
  assert_eq!(names, ["c", "a"]);

  let skipped = backend
    .list("proposals", None, Some(&order), None, Some(3))
    .await
    .unwrap();
  assert_eq!(skipped.len(), 1);
}

#[tokio::test]
async fn test_list_rejects_bad_identifiers() {
  let backend = backend().await;
  let order = OrderBySpec {
    field: "name'; DROP TABLE documents; --".into(),
    direction: OrderDirection::Asc,
  };
  assert!(backend
    .list("clients", None, Some(&order), None, None)
    .await
    .is_err());
  assert!(backend.list("bad name", None, None, None, None).await.is_err());
}

#[tokio::test]
async fn test_change_listener_publishes_mutations() {
  let backend = backend().await;
  // history before startup is not replayed
  backend.insert("clients", json!({"name": "old"})).await.unwrap();

  let mut rx = backend.subscribe_changes();
  backend.start_change_listener().await.unwrap();

  let doc = backend.insert("clients", json!({"name": "new"})).await.unwrap();
  backend
    .update("clients", doc.id, json!({"name": "newer"}))
    .await
    .unwrap();

  let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(first.operation, ChangeOperation::Insert);
  assert_eq!(first.document_id, doc.id);
  assert_eq!(first.new_data.unwrap()["name"], "new");

  let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(second.operation, ChangeOperation::Update);
  assert_eq!(second.old_data.unwrap()["name"], "new");
  assert_eq!(second.new_data.unwrap()["name"], "newer");
}

#[tokio::test]
async fn test_users_and_sessions() {
  let backend = backend().await;
  let user = backend
    .create_user(NewUser {
      partner_id: "p1",
      name: "Bia",
      email: "bia@example.com",
      password_hash: "hash",
      role: UserRole::Manager,
    })
    .await
    .unwrap();

  let (found, hash) = backend
    .get_user_by_email("bia@example.com")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.id, user.id);
  assert_eq!(hash, "hash");
  assert_eq!(found.role, UserRole::Manager);

  // email is unique
  assert!(backend
    .create_user(NewUser {
      partner_id: "p2",
      name: "Other",
      email: "bia@example.com",
      password_hash: "x",
      role: UserRole::User,
    })
    .await
    .is_err());

  assert_eq!(backend.list_users(Some("p1")).await.unwrap().len(), 1);
  assert!(backend.list_users(Some("p2")).await.unwrap().is_empty());

  let live = backend
    .create_session(user.id, "live", Utc::now() + chrono::Duration::hours(1))
    .await
    .unwrap();
  backend
    .create_session(user.id, "stale", Utc::now() - chrono::Duration::hours(1))
    .await
    .unwrap();

  let (session, session_user) = backend.validate_session("live").await.unwrap().unwrap();
  assert_eq!(session.id, live.id);
  assert_eq!(session_user.email, "bia@example.com");
  assert!(backend.validate_session("stale").await.unwrap().is_none());

  assert_eq!(backend.cleanup_expired_sessions().await.unwrap(), 1);
  assert_eq!(backend.delete_sessions_for_user(user.id).await.unwrap(), 1);
  assert!(backend.validate_session("live").await.unwrap().is_none());

  assert!(backend.delete_user(user.id).await.unwrap());
  assert!(backend.get_user(user.id).await.unwrap().is_none());
}
