use std::sync::Arc;

use serde_json::{json, Value};
use solarcrm::crm::{
  lose_opportunity, mark_notification_read, win_opportunity, CrmError, EntityKind, PartnerScope,
  Repository,
};
use solarcrm::db::{DatabaseBackend, SqliteBackend};
use solarcrm::query;
use solarcrm::types::{FindOptions, StructuredFilter};

async fn repo() -> Repository {
  let backend = SqliteBackend::in_memory().await.unwrap();
  backend.init_schema().await.unwrap();
  Repository::new(Arc::new(backend))
}

fn partner(id: &str) -> PartnerScope {
  PartnerScope::Partner(id.to_string())
}

fn id_of(record: &Value) -> String {
  record["_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_insert_stamps_bookkeeping_fields() {
  let repo = repo().await;
  let client = repo
    .insert(
      EntityKind::Clients,
      &partner("p1"),
      json!({"name": "Ana", "idParceiro": "p2", "_id": "forged", "insertedAt": "1999-01-01"}),
    )
    .await
    .unwrap();

  assert_eq!(client["idParceiro"], "p1");
  assert_ne!(client["_id"], "forged");
  assert_ne!(client["insertedAt"], "1999-01-01");
  assert_eq!(client["insertedAt"], client["updatedAt"]);
}

#[tokio::test]
async fn test_insert_reports_invalid_field() {
  let repo = repo().await;
  let err = repo
    .insert(EntityKind::Revenues, &partner("p1"), json!({"description": "Kit", "total": -1}))
    .await
    .unwrap_err();
  match err {
    CrmError::Validation(e) => assert_eq!(e.field, "total"),
    other => panic!("expected validation error, got {:?}", other),
  }
}

#[tokio::test]
async fn test_admin_insert_requires_partner() {
  let repo = repo().await;
  let err = repo
    .insert(EntityKind::Clients, &PartnerScope::All, json!({"name": "Ana"}))
    .await
    .unwrap_err();
  assert!(matches!(err, CrmError::Validation(e) if e.field == "idParceiro"));

  let ok = repo
    .insert(EntityKind::Clients, &PartnerScope::All, json!({"name": "Ana", "idParceiro": "p9"}))
    .await
    .unwrap();
  assert_eq!(ok["idParceiro"], "p9");
}

#[tokio::test]
async fn test_partners_never_see_each_other() {
  let repo = repo().await;
  let mine = repo
    .insert(EntityKind::Clients, &partner("p1"), json!({"name": "Mine"}))
    .await
    .unwrap();
  repo
    .insert(EntityKind::Clients, &partner("p2"), json!({"name": "Theirs"}))
    .await
    .unwrap();

  let listed = repo
    .query(EntityKind::Clients, &partner("p1"), FindOptions::default())
    .await
    .unwrap();
  assert_eq!(listed.len(), 1);
  assert_eq!(listed[0]["name"], "Mine");

  let id = id_of(&mine);
  for result in [
    repo.get(EntityKind::Clients, &partner("p2"), &id).await,
    repo
      .update(EntityKind::Clients, &partner("p2"), &id, json!({"name": "x"}))
      .await,
    repo.delete(EntityKind::Clients, &partner("p2"), &id).await,
  ] {
    assert!(matches!(result, Err(CrmError::NotFound(_))));
  }

  let everyone = repo
    .query(EntityKind::Clients, &PartnerScope::All, FindOptions::default())
    .await
    .unwrap();
  assert_eq!(everyone.len(), 2);
}

#[tokio::test]
async fn test_update_reflects_changes_and_keeps_immutables() {
  let repo = repo().await;
  let client = repo
    .insert(EntityKind::Clients, &partner("p1"), json!({"name": "Ana", "phone": "1"}))
    .await
    .unwrap();
  let id = id_of(&client);

  let updated = repo
    .update(
      EntityKind::Clients,
      &partner("p1"),
      &id,
      json!({"phone": "2", "idParceiro": "p2", "insertedAt": "2000-01-01T00:00:00Z"}),
    )
    .await
    .unwrap();
  assert_eq!(updated["phone"], "2");
  assert_eq!(updated["name"], "Ana");
  assert_eq!(updated["idParceiro"], "p1");
  assert_eq!(updated["insertedAt"], client["insertedAt"]);

  let stored = repo.get(EntityKind::Clients, &partner("p1"), &id).await.unwrap();
  assert_eq!(stored, updated);

  // no-op update leaves updatedAt alone
  let again = repo
    .update(EntityKind::Clients, &partner("p1"), &id, json!({"phone": "2"}))
    .await
    .unwrap();
  assert_eq!(again["updatedAt"], updated["updatedAt"]);
}

#[tokio::test]
async fn test_query_filters_and_malformed_ids() {
  let repo = repo().await;
  for (name, status) in [("A", "open"), ("B", "won"), ("C", "open")] {
    repo
      .insert(
        EntityKind::Opportunities,
        &partner("p1"),
        json!({"name": name, "clientId": "c1", "status": status}),
      )
      .await
      .unwrap();
  }
  let open = repo
    .query(
      EntityKind::Opportunities,
      &partner("p1"),
      FindOptions::filter(StructuredFilter::eq("status", "open")),
    )
    .await
    .unwrap();
  assert_eq!(open.len(), 2);

  assert!(matches!(
    repo.get(EntityKind::Opportunities, &partner("p1"), "not-a-uuid").await,
    Err(CrmError::NotFound(_))
  ));
}

/// Names of the records the stored query returns, checked against the in-memory matcher.
async fn agreed_names(repo: &Repository, kind: EntityKind, filter: Value) -> Vec<String> {
  let filter: StructuredFilter = serde_json::from_value(filter).unwrap();
  let all = repo
    .query(kind, &partner("p1"), FindOptions::default())
    .await
    .unwrap();
  let queried = repo
    .query(kind, &partner("p1"), FindOptions::filter(filter.clone()))
    .await
    .unwrap();

  let mut from_sql: Vec<String> = queried
    .iter()
    .map(|r| r["name"].as_str().unwrap().to_string())
    .collect();
  let mut in_memory: Vec<String> = all
    .iter()
    .filter(|r| query::matches(&filter, r))
    .map(|r| r["name"].as_str().unwrap().to_string())
    .collect();
  from_sql.sort();
  in_memory.sort();
  assert_eq!(from_sql, in_memory, "query and matcher disagree on {:?}", filter);
  from_sql
}

#[tokio::test]
async fn test_not_keeps_records_missing_the_field() {
  let repo = repo().await;
  for body in [
    json!({"name": "Unset", "clientId": "c1"}),
    json!({"name": "Won", "clientId": "c1", "status": "won"}),
    json!({"name": "Running", "clientId": "c1", "status": "running"}),
  ] {
    repo
      .insert(EntityKind::Projects, &partner("p1"), body)
      .await
      .unwrap();
  }

  let names = agreed_names(&repo, EntityKind::Projects, json!({"$not": {"status": "won"}})).await;
  assert_eq!(names, vec!["Running", "Unset"]);
  let names = agreed_names(&repo, EntityKind::Projects, json!({"status": {"$ne": "won"}})).await;
  assert_eq!(names, vec!["Running", "Unset"]);
}

#[tokio::test]
async fn test_text_operators_fold_accented_letters() {
  let repo = repo().await;
  for name in ["JOÃO DA CONCEIÇÃO", "Maria Souza", "Conceição Energia"] {
    repo
      .insert(EntityKind::Clients, &partner("p1"), json!({"name": name}))
      .await
      .unwrap();
  }

  let names = agreed_names(&repo, EntityKind::Clients, json!({"name": {"$contains": "joão"}})).await;
  assert_eq!(names, vec!["JOÃO DA CONCEIÇÃO"]);
  let names = agreed_names(&repo, EntityKind::Clients, json!({"name": {"$startsWith": "CONCEIÇÃO"}})).await;
  assert_eq!(names, vec!["Conceição Energia"]);
  let names = agreed_names(&repo, EntityKind::Clients, json!({"name": {"$endsWith": "conceição"}})).await;
  assert_eq!(names, vec!["JOÃO DA CONCEIÇÃO"]);
}

#[tokio::test]
async fn test_indexed_paths_and_typed_comparisons() {
  let repo = repo().await;
  for body in [
    json!({"name": "Ana's", "clientId": "c1", "responsibles": [{"id": "u1"}, {"id": "u2"}]}),
    json!({"name": "Bia's", "clientId": "c2", "responsibles": [{"id": "u2"}]}),
    json!({"name": "Zero", "clientId": "0"}),
  ] {
    repo
      .insert(EntityKind::Opportunities, &partner("p1"), body)
      .await
      .unwrap();
  }

  let names = agreed_names(&repo, EntityKind::Opportunities, json!({"responsibles.0.id": "u2"})).await;
  assert_eq!(names, vec!["Bia's"]);
  let names = agreed_names(&repo, EntityKind::Opportunities, json!({"responsibles.1.id": "u2"})).await;
  assert_eq!(names, vec!["Ana's"]);

  // Text ids never equal a number, and ordering against one is simply false
  let names = agreed_names(&repo, EntityKind::Opportunities, json!({"clientId": 0})).await;
  assert!(names.is_empty());
  let names = agreed_names(&repo, EntityKind::Opportunities, json!({"clientId": {"$gte": 0}})).await;
  assert!(names.is_empty());
  let names = agreed_names(&repo, EntityKind::Opportunities, json!({"clientId": {"$ne": 0}})).await;
  assert_eq!(names.len(), 3);
}

#[tokio::test]
async fn test_find_separates_missing_from_storage_failure() {
  let repo = repo().await;
  let client = repo
    .insert(EntityKind::Clients, &partner("p1"), json!({"name": "Ana"}))
    .await
    .unwrap();
  let id = id_of(&client);

  let found = repo.find(EntityKind::Clients, &partner("p1"), &id).await.unwrap();
  assert_eq!(found.unwrap()["name"], "Ana");
  assert!(repo
    .find(EntityKind::Clients, &partner("p2"), &id)
    .await
    .unwrap()
    .is_none());
  assert!(repo
    .find(EntityKind::Clients, &partner("p1"), "not-a-uuid")
    .await
    .unwrap()
    .is_none());

  repo.backend().drop_schema().await.unwrap();
  assert!(matches!(
    repo.find(EntityKind::Clients, &partner("p1"), &id).await,
    Err(CrmError::Storage(_))
  ));
}

#[tokio::test]
async fn test_expand_attaches_references() {
  let repo = repo().await;
  let scope = partner("p1");
  let client = repo
    .insert(EntityKind::Clients, &scope, json!({"name": "Ana"}))
    .await
    .unwrap();
  repo
    .insert(
      EntityKind::Opportunities,
      &scope,
      json!({"name": "Roof", "clientId": id_of(&client), "projectId": uuid::Uuid::new_v4().to_string()}),
    )
    .await
    .unwrap();

  let mut records = repo
    .query(EntityKind::Opportunities, &scope, FindOptions::default())
    .await
    .unwrap();
  repo
    .expand(EntityKind::Opportunities, &scope, &mut records, None)
    .await
    .unwrap();
  assert_eq!(records[0]["client"]["name"], "Ana");
  assert_eq!(records[0]["project"], Value::Null);

  let only = vec!["project".to_string()];
  let mut fresh = repo
    .query(EntityKind::Opportunities, &scope, FindOptions::default())
    .await
    .unwrap();
  repo
    .expand(EntityKind::Opportunities, &scope, &mut fresh, Some(&only))
    .await
    .unwrap();
  assert!(fresh[0].get("client").is_none());
}

async fn opportunity_with_proposal(repo: &Repository, scope: &PartnerScope) -> (String, String) {
  let opportunity = repo
    .insert(
      EntityKind::Opportunities,
      scope,
      json!({"name": "Roof 8kWp", "clientId": "c1", "responsibles": [{"id": "u1", "name": "Bia"}]}),
    )
    .await
    .unwrap();
  let proposal = repo
    .insert(
      EntityKind::Proposals,
      scope,
      json!({"name": "P1", "opportunityId": id_of(&opportunity), "value": 48000}),
    )
    .await
    .unwrap();
  (id_of(&opportunity), id_of(&proposal))
}

#[tokio::test]
async fn test_win_opportunity_creates_project() {
  let repo = repo().await;
  let scope = partner("p1");
  let (opportunity_id, proposal_id) = opportunity_with_proposal(&repo, &scope).await;

  let won = win_opportunity(&repo, &scope, &opportunity_id, &proposal_id)
    .await
    .unwrap();
  assert_eq!(won.opportunity["status"], "won");
  assert_eq!(won.opportunity["winningProposalId"], proposal_id.as_str());
  assert_eq!(won.opportunity["projectId"], won.project["_id"]);
  assert_eq!(won.project["value"], 48000);
  assert_eq!(won.project["opportunityId"], opportunity_id.as_str());
  assert_eq!(won.project["responsibles"][0]["id"], "u1");
  assert_eq!(won.project["idParceiro"], "p1");

  let again = win_opportunity(&repo, &scope, &opportunity_id, &proposal_id).await;
  assert!(matches!(again, Err(CrmError::Conflict(_))));

  let lose = lose_opportunity(&repo, &scope, &opportunity_id, "price").await;
  assert!(matches!(lose, Err(CrmError::Conflict(_))));
}

#[tokio::test]
async fn test_win_rejects_foreign_proposal() {
  let repo = repo().await;
  let scope = partner("p1");
  let (opportunity_id, _) = opportunity_with_proposal(&repo, &scope).await;
  let (_, other_proposal) = opportunity_with_proposal(&repo, &scope).await;

  let err = win_opportunity(&repo, &scope, &opportunity_id, &other_proposal)
    .await
    .unwrap_err();
  assert!(matches!(err, CrmError::Validation(e) if e.field == "proposalId"));

  let stored = repo
    .get(EntityKind::Opportunities, &scope, &opportunity_id)
    .await
    .unwrap();
  assert_eq!(stored["status"], "open");
}

#[tokio::test]
async fn test_lose_requires_reason() {
  let repo = repo().await;
  let scope = partner("p1");
  let (opportunity_id, _) = opportunity_with_proposal(&repo, &scope).await;

  assert!(matches!(
    lose_opportunity(&repo, &scope, &opportunity_id, "  ").await,
    Err(CrmError::Validation(_))
  ));
  let lost = lose_opportunity(&repo, &scope, &opportunity_id, "price")
    .await
    .unwrap();
  assert_eq!(lost["status"], "lost");
  assert_eq!(lost["lossReason"], "price");

  let again = lose_opportunity(&repo, &scope, &opportunity_id, "timing")
    .await
    .unwrap();
  assert_eq!(again["lossReason"], "price");
  assert_eq!(again["lostAt"], lost["lostAt"]);
  assert_eq!(again["updatedAt"], lost["updatedAt"]);
}

#[tokio::test]
async fn test_mark_notification_read_is_idempotent() {
  let repo = repo().await;
  let scope = partner("p1");
  let notification = repo
    .insert(EntityKind::Notifications, &scope, json!({"message": "hi"}))
    .await
    .unwrap();
  let id = id_of(&notification);

  let first = mark_notification_read(&repo, &scope, &id).await.unwrap();
  assert!(first["readAt"].is_string());
  let second = mark_notification_read(&repo, &scope, &id).await.unwrap();
  assert_eq!(first["readAt"], second["readAt"]);
}
