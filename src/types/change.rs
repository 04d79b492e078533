use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
  Insert,
  Update,
  Delete,
}

impl std::str::FromStr for ChangeOperation {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "INSERT" => Ok(Self::Insert),
      "UPDATE" => Ok(Self::Update),
      "DELETE" => Ok(Self::Delete),
      _ => Err(format!("Unknown operation: {}", s)),
    }
  }
}

/// A captured mutation from the change queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
  pub id: i64,
  pub collection: String,
  pub document_id: Uuid,
  pub operation: ChangeOperation,
  pub old_data: Option<serde_json::Value>,
  pub new_data: Option<serde_json::Value>,
  pub changed_at: DateTime<Utc>,
}

impl Change {
  /// The document as it is now, or as it was right before a delete.
  pub fn current(&self) -> Option<&serde_json::Value> {
    match self.operation {
      ChangeOperation::Delete => self.old_data.as_ref(),
      _ => self.new_data.as_ref(),
    }
  }
}
