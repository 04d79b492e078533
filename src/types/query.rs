use serde::{Deserialize, Serialize};

use super::StructuredFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBySpec {
  pub field: String,
  pub direction: OrderDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
  #[default]
  Asc,
  Desc,
}

/// Options for a collection query.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
  pub filter: Option<StructuredFilter>,
  pub order: Option<OrderBySpec>,
  pub limit: Option<usize>,
  pub skip: Option<usize>,
}

impl FindOptions {
  pub fn filter(filter: StructuredFilter) -> Self {
    Self {
      filter: Some(filter),
      ..Default::default()
    }
  }
}
