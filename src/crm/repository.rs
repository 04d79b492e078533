use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::{CrmError, ValidationError};
use super::kind::EntityKind;
use super::schema::{self, AUTOMATION_MARK, ID_FIELD, INSERTED_AT, PARTNER_FIELD, UPDATED_AT};
use crate::db::DatabaseBackend;
use crate::query::StructuredCompiler;
use crate::types::{Document, FindOptions, StructuredFilter};

/// Fields a client can never overwrite.
const IMMUTABLE_FIELDS: &[&str] = &[ID_FIELD, PARTNER_FIELD, INSERTED_AT, AUTOMATION_MARK];

/// Which partners' documents an operation may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartnerScope {
  Partner(String),
  /// Administrators see every partner
  All,
}

impl PartnerScope {
  pub fn partner(&self) -> Option<&str> {
    match self {
      Self::Partner(id) => Some(id),
      Self::All => None,
    }
  }

  fn can_see(&self, kind: EntityKind, doc: &Document) -> bool {
    match self {
      Self::All => true,
      Self::Partner(_) if !kind.partner_scoped() => true,
      Self::Partner(id) => doc.str_field(PARTNER_FIELD) == Some(id.as_str()),
    }
  }
}

/// Current time in the wire format used for bookkeeping fields.
pub fn timestamp() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Partner-scoped CRUD over the document store, one collection per entity kind.
#[derive(Clone)]
pub struct Repository {
  backend: Arc<dyn DatabaseBackend>,
}

impl Repository {
  pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
    Self { backend }
  }

  pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
    &self.backend
  }

  pub async fn insert(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    data: Value,
  ) -> Result<Value, CrmError> {
    let Value::Object(mut map) = data else {
      return Err(ValidationError::new("body", "must be a JSON object").into());
    };
    map.remove(ID_FIELD);
    map.remove(UPDATED_AT);
    map.remove(INSERTED_AT);
    map.remove(AUTOMATION_MARK);

    if kind.partner_scoped() {
      let partner = match scope {
        PartnerScope::Partner(id) => id.clone(),
        PartnerScope::All => match map.get(PARTNER_FIELD).and_then(Value::as_str) {
          Some(id) if !id.trim().is_empty() => id.to_string(),
          _ => return Err(ValidationError::new(PARTNER_FIELD, "is required").into()),
        },
      };
      map.insert(PARTNER_FIELD.into(), Value::String(partner));
    } else {
      map.remove(PARTNER_FIELD);
    }

    let now = timestamp();
    map.insert(INSERTED_AT.into(), Value::String(now.clone()));
    map.insert(UPDATED_AT.into(), Value::String(now));

    let data = schema::validate(kind, Value::Object(map))?;
    let doc = self.backend.insert(kind.collection(), data).await?;
    tracing::debug!(collection = kind.collection(), id = %doc.id, "Inserted document");
    Ok(doc.to_record())
  }

  pub async fn get(&self, kind: EntityKind, scope: &PartnerScope, id: &str) -> Result<Value, CrmError> {
    Ok(self.fetch(kind, scope, id).await?.to_record())
  }

  /// Like [`get`](Self::get), but a missing record is `None`; storage errors still surface.
  pub async fn find(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    id: &str,
  ) -> Result<Option<Value>, CrmError> {
    match self.get(kind, scope, id).await {
      Ok(record) => Ok(Some(record)),
      Err(CrmError::NotFound(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// `$set`-style merge of top-level fields, then re-validation of the whole document.
  pub async fn update(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    id: &str,
    changes: Value,
  ) -> Result<Value, CrmError> {
    self.merge(kind, scope, id, changes, None).await
  }

  /// [`update`](Self::update) on behalf of an automation; `mark` lands in `automatedBy`.
  pub async fn update_as_automation(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    id: &str,
    changes: Value,
    mark: Value,
  ) -> Result<Value, CrmError> {
    self.merge(kind, scope, id, changes, Some(mark)).await
  }

  async fn merge(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    id: &str,
    changes: Value,
    mark: Option<Value>,
  ) -> Result<Value, CrmError> {
    let Value::Object(changes) = changes else {
      return Err(ValidationError::new("body", "must be a JSON object").into());
    };

    let doc = self.fetch(kind, scope, id).await?;
    let mut merged = match &doc.data {
      Value::Object(map) => map.clone(),
      _ => Map::new(),
    };
    for (field, value) in changes {
      if IMMUTABLE_FIELDS.contains(&field.as_str()) || field == UPDATED_AT {
        continue;
      }
      merged.insert(field, value);
    }

    if Value::Object(merged.clone()) == doc.data {
      return Ok(doc.to_record());
    }
    merged.insert(UPDATED_AT.into(), Value::String(timestamp()));
    if let Some(mark) = mark {
      merged.insert(AUTOMATION_MARK.into(), mark);
    }

    let data = schema::validate(kind, Value::Object(merged))?;
    let updated = self
      .backend
      .update(kind.collection(), doc.id, data)
      .await?
      .ok_or_else(|| CrmError::not_found(kind.label()))?;
    Ok(updated.to_record())
  }

  pub async fn delete(&self, kind: EntityKind, scope: &PartnerScope, id: &str) -> Result<Value, CrmError> {
    let doc = self.fetch(kind, scope, id).await?;
    let deleted = self
      .backend
      .delete(kind.collection(), doc.id)
      .await?
      .ok_or_else(|| CrmError::not_found(kind.label()))?;
    Ok(deleted.to_record())
  }

  pub async fn query(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    options: FindOptions,
  ) -> Result<Vec<Value>, CrmError> {
    let mut filters = Vec::with_capacity(2);
    if let (true, Some(partner)) = (kind.partner_scoped(), scope.partner()) {
      filters.push(StructuredFilter::eq(PARTNER_FIELD, partner));
    }
    filters.extend(options.filter);

    let sql = if filters.is_empty() {
      None
    } else {
      let compiler = StructuredCompiler::new(self.backend.dialect());
      Some(compiler.filter_to_sql(&StructuredFilter::all(filters))?)
    };

    let docs = self
      .backend
      .list(
        kind.collection(),
        sql.as_deref(),
        options.order.as_ref(),
        options.limit,
        options.skip,
      )
      .await?;
    Ok(docs.iter().map(Document::to_record).collect())
  }

  /// Attach referenced documents under their alias (`client`, `opportunity`, ...).
  ///
  /// `only` restricts expansion to the named aliases. Dangling or foreign ids expand to `null`.
  pub async fn expand(
    &self,
    kind: EntityKind,
    scope: &PartnerScope,
    records: &mut [Value],
    only: Option<&[String]>,
  ) -> Result<(), CrmError> {
    let mut cache: HashMap<(EntityKind, String), Value> = HashMap::new();

    for reference in kind.references() {
      if only.is_some_and(|names| !names.iter().any(|n| n == reference.alias)) {
        continue;
      }
      for record in records.iter_mut() {
        let Some(id) = record.get(reference.field).and_then(Value::as_str) else {
          continue;
        };
        let key = (reference.target, id.to_string());
        let expanded = match cache.get(&key) {
          Some(v) => v.clone(),
          None => {
            let v = match self.get(reference.target, scope, id).await {
              Ok(v) => v,
              Err(CrmError::NotFound(_)) => Value::Null,
              Err(e) => return Err(e),
            };
            cache.insert(key, v.clone());
            v
          }
        };
        if let Value::Object(map) = record {
          map.insert(reference.alias.to_string(), expanded);
        }
      }
    }
    Ok(())
  }

  /// Raw document lookup honoring the partner scope; foreign or malformed ids are "not found".
  pub async fn fetch(&self, kind: EntityKind, scope: &PartnerScope, id: &str) -> Result<Document, CrmError> {
    let not_found = || CrmError::not_found(kind.label());
    let uuid: Uuid = id.parse().map_err(|_| not_found())?;
    let doc = self
      .backend
      .get(kind.collection(), uuid)
      .await?
      .ok_or_else(|| not_found())?;
    if !scope.can_see(kind, &doc) {
      return Err(not_found());
    }
    Ok(doc)
  }
}
