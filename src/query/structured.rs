use serde_json::Value;
use thiserror::Error;

use crate::db::sanitize::{escape_string, validate_identifier, validate_numeric, SqlSanitizeError};
use crate::db::SqlDialect;
use crate::types::{FieldCondition, FilterOperator, LogicalFilter, StructuredFilter};

#[derive(Debug, Error)]
pub enum FilterError {
  #[error(transparent)]
  Sanitize(#[from] SqlSanitizeError),
  #[error("Unsupported value for {op}: {value}")]
  UnsupportedValue { op: &'static str, value: String },
}

/// Compiles structured filters into SQL WHERE fragments over the `data` column.
pub struct StructuredCompiler {
  dialect: SqlDialect,
}

impl StructuredCompiler {
  pub fn new(dialect: SqlDialect) -> Self {
    Self { dialect }
  }

  /// Convert a StructuredFilter to a SQL boolean expression
  pub fn filter_to_sql(&self, filter: &StructuredFilter) -> Result<String, FilterError> {
    match filter {
      StructuredFilter::Logical(logical) => self.logical_to_sql(logical),
      StructuredFilter::Fields(fields) => {
        let mut parts = fields
          .iter()
          .map(|(field, cond)| self.field_condition_to_sql(field, cond))
          .collect::<Result<Vec<_>, _>>()?;
        match parts.len() {
          0 => Ok("1 = 1".to_string()),
          1 => Ok(parts.remove(0)),
          _ => Ok(format!("({})", parts.join(" AND "))),
        }
      }
    }
  }

  fn logical_to_sql(&self, logical: &LogicalFilter) -> Result<String, FilterError> {
    match logical {
      LogicalFilter::And(filters) | LogicalFilter::Or(filters) if filters.is_empty() => {
        Ok(if matches!(logical, LogicalFilter::And(_)) {
          "1 = 1".to_string()
        } else {
          "1 = 0".to_string()
        })
      }
      LogicalFilter::And(filters) => {
        let parts = filters
          .iter()
          .map(|f| self.filter_to_sql(f))
          .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(" AND ")))
      }
      LogicalFilter::Or(filters) => {
        let parts = filters
          .iter()
          .map(|f| self.filter_to_sql(f))
          .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(" OR ")))
      }
      // An unknown (NULL) inner result counts as "did not match", so documents
      // missing the field pass the negation as they do in memory.
      LogicalFilter::Not(filter) => {
        let inner = self.filter_to_sql(filter)?;
        Ok(format!("NOT COALESCE(({}), FALSE)", inner))
      }
    }
  }

  fn field_condition_to_sql(
    &self,
    field: &str,
    condition: &FieldCondition,
  ) -> Result<String, FilterError> {
    validate_identifier(field)?;

    match condition {
      FieldCondition::Operator(op) => self.operator_to_sql(field, op),
      FieldCondition::Value(v) => self.comparison_sql(field, "=", v),
    }
  }

  fn operator_to_sql(&self, field: &str, op: &FilterOperator) -> Result<String, FilterError> {
    match op {
      FilterOperator::Eq(v) => self.comparison_sql(field, "=", v),
      FilterOperator::Ne(v) => self.not_equal_sql(field, v),
      FilterOperator::Gt(v) => self.ordering_sql(field, ">", v),
      FilterOperator::Gte(v) => self.ordering_sql(field, ">=", v),
      FilterOperator::Lt(v) => self.ordering_sql(field, "<", v),
      FilterOperator::Lte(v) => self.ordering_sql(field, "<=", v),
      FilterOperator::In(values) => self.in_sql(field, values, false),
      FilterOperator::NotIn(values) => self.in_sql(field, values, true),
      FilterOperator::Contains(s) => self.like_sql(field, s, "%", "%"),
      FilterOperator::StartsWith(s) => self.like_sql(field, s, "", "%"),
      FilterOperator::EndsWith(s) => self.like_sql(field, s, "%", ""),
      FilterOperator::Exists(exists) => Ok(self.null_check(field, !*exists)),
    }
  }

  /// Text expression for a field; `_id` maps to the row id column.
  fn text_expr(&self, field: &str) -> String {
    match (field, self.dialect) {
      ("_id", SqlDialect::Postgres) => "id::text".to_string(),
      ("_id", SqlDialect::Sqlite) => "id".to_string(),
      _ => self.dialect.json_text(field),
    }
  }

  fn null_check(&self, field: &str, is_null: bool) -> String {
    format!(
      "{} IS {}NULL",
      self.text_expr(field),
      if is_null { "" } else { "NOT " }
    )
  }

  fn comparison_sql(&self, field: &str, sql_op: &str, value: &Value) -> Result<String, FilterError> {
    match value {
      Value::Null => Ok(self.null_check(field, sql_op == "=")),
      Value::Bool(b) => Ok(format!(
        "{} {} {}",
        self.dialect.json_bool(field),
        sql_op,
        if *b { "true" } else { "false" }
      )),
      Value::Number(n) => {
        let num_str = n.to_string();
        validate_numeric(&num_str)?;
        Ok(format!(
          "{} {} {}",
          self.dialect.json_numeric(field),
          sql_op,
          num_str
        ))
      }
      Value::String(s) => Ok(format!(
        "{} {} '{}'",
        self.text_expr(field),
        sql_op,
        escape_string(s)?
      )),
      other => Err(FilterError::UnsupportedValue {
        op: "equality",
        value: other.to_string(),
      }),
    }
  }

  /// Missing fields and values of another JSON type count as "not equal".
  fn not_equal_sql(&self, field: &str, value: &Value) -> Result<String, FilterError> {
    if value.is_null() {
      return Ok(self.null_check(field, false));
    }
    let eq = self.comparison_sql(field, "=", value)?;
    Ok(format!("NOT COALESCE({}, FALSE)", eq))
  }

  /// Numbers compare numerically, strings (dates) lexicographically.
  fn ordering_sql(&self, field: &str, sql_op: &str, value: &Value) -> Result<String, FilterError> {
    match value {
      Value::Number(_) | Value::String(_) => self.comparison_sql(field, sql_op, value),
      other => Err(FilterError::UnsupportedValue {
        op: "ordering comparison",
        value: other.to_string(),
      }),
    }
  }

  fn in_sql(&self, field: &str, values: &[Value], negate: bool) -> Result<String, FilterError> {
    let includes_null = values.iter().any(Value::is_null);
    let formatted = values
      .iter()
      .filter(|v| !v.is_null())
      .map(|v| self.format_in_value(v))
      .collect::<Result<Vec<_>, _>>()?;

    let membership = if formatted.is_empty() {
      None
    } else {
      Some(format!(
        "{} {} ({})",
        self.text_expr(field),
        if negate { "NOT IN" } else { "IN" },
        formatted.join(", ")
      ))
    };

    Ok(match (membership, negate, includes_null) {
      (None, false, false) => "1 = 0".to_string(),
      (None, false, true) => self.null_check(field, true),
      (None, true, false) => "1 = 1".to_string(),
      (None, true, true) => self.null_check(field, false),
      (Some(m), false, false) => m,
      (Some(m), false, true) => format!("({} OR {})", m, self.null_check(field, true)),
      (Some(m), true, false) => format!("({} OR {})", self.null_check(field, true), m),
      (Some(m), true, true) => format!("({} AND {})", self.null_check(field, false), m),
    })
  }

  /// IN lists compare against the text projection on Postgres and native values on SQLite.
  fn format_in_value(&self, value: &Value) -> Result<String, FilterError> {
    match (value, self.dialect) {
      (Value::Bool(b), SqlDialect::Postgres) => Ok(format!("'{}'", b)),
      (Value::Bool(b), SqlDialect::Sqlite) => Ok(if *b { "1" } else { "0" }.to_string()),
      (Value::Number(n), dialect) => {
        let s = n.to_string();
        validate_numeric(&s)?;
        Ok(match dialect {
          SqlDialect::Postgres => format!("'{}'", s),
          SqlDialect::Sqlite => s,
        })
      }
      (Value::String(s), _) => Ok(format!("'{}'", escape_string(s)?)),
      (other, _) => Err(FilterError::UnsupportedValue {
        op: "$in",
        value: other.to_string(),
      }),
    }
  }

  /// Case-insensitive pattern match on both dialects, folding non-ASCII letters too.
  fn like_sql(&self, field: &str, value: &str, prefix: &str, suffix: &str) -> Result<String, FilterError> {
    let escaped = escape_string(&value.to_lowercase())?;
    let pattern = escaped
      .replace('\\', "\\\\")
      .replace('%', "\\%")
      .replace('_', "\\_");
    Ok(self.dialect.ilike(
      &self.text_expr(field),
      &format!("{}{}{}", prefix, pattern, suffix),
    ))
  }
}

impl Default for StructuredCompiler {
  fn default() -> Self {
    Self::new(SqlDialect::Postgres)
  }
}
