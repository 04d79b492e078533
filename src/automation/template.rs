use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::query::lookup;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
    .expect("placeholder pattern is valid")
});

/// Substitute `{{dotted.path}}` placeholders with values from `record`.
///
/// Strings are inserted verbatim, other scalars in their JSON form; missing paths render empty.
pub fn render(template: &str, record: &Value) -> String {
  PLACEHOLDER
    .replace_all(template, |caps: &Captures| match lookup(record, &caps[1]) {
      Some(Value::String(s)) => s.clone(),
      Some(other) => other.to_string(),
      None => String::new(),
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn renders_nested_paths() {
    let record = json!({"name": "Usina Boa Vista", "value": 48000, "funnel": {"stage": "won"}});
    assert_eq!(
      render("{{name}} moved to {{ funnel.stage }} ({{value}})", &record),
      "Usina Boa Vista moved to won (48000)"
    );
  }

  #[test]
  fn missing_paths_render_empty() {
    assert_eq!(render("Client: {{client.name}}!", &json!({})), "Client: !");
  }

  #[test]
  fn text_without_placeholders_is_unchanged() {
    assert_eq!(render("No braces { here }", &json!({})), "No braces { here }");
  }
}
