use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored document: one row of the `documents` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
  pub id: Uuid,
  pub collection: String,
  pub data: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Document {
  /// Flatten into the API shape: the document's fields plus `_id`.
  pub fn to_record(&self) -> serde_json::Value {
    let mut record = match &self.data {
      serde_json::Value::Object(map) => map.clone(),
      other => {
        let mut map = serde_json::Map::new();
        map.insert("value".into(), other.clone());
        map
      }
    };
    record.insert("_id".into(), serde_json::Value::String(self.id.to_string()));
    serde_json::Value::Object(record)
  }

  /// Read a string field from the document body.
  pub fn str_field(&self, field: &str) -> Option<&str> {
    self.data.get(field).and_then(|v| v.as_str())
  }
}
