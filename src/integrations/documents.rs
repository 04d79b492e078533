use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{error_body, http_client, IntegrationError};

const SERVICE: &str = "Document";

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
  /// Render `html` into a PDF named `file_name`.
  async fn render_pdf(&self, html: &str, file_name: &str) -> Result<Vec<u8>, IntegrationError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
  html: &'a str,
  file_name: &'a str,
}

pub struct HttpDocumentRenderer {
  client: reqwest::Client,
  url: String,
  api_key: String,
}

impl HttpDocumentRenderer {
  pub fn new(url: &str, api_key: &str, timeout: Duration) -> Self {
    Self {
      client: http_client(timeout),
      url: url.to_string(),
      api_key: api_key.trim().to_string(),
    }
  }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
  async fn render_pdf(&self, html: &str, file_name: &str) -> Result<Vec<u8>, IntegrationError> {
    let response = self
      .client
      .post(&self.url)
      .bearer_auth(&self.api_key)
      .json(&RenderRequest { html, file_name })
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(IntegrationError::Status {
        service: SERVICE,
        status: status.as_u16(),
        body: error_body(body),
      });
    }

    Ok(response.bytes().await?.to_vec())
  }
}

pub struct DisabledDocuments;

#[async_trait]
impl DocumentRenderer for DisabledDocuments {
  async fn render_pdf(&self, _html: &str, _file_name: &str) -> Result<Vec<u8>, IntegrationError> {
    Err(IntegrationError::NotConfigured(SERVICE))
  }
}

fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(c),
    }
  }
  out
}

/// Brazilian currency format: `R$ 48.000,00`.
fn format_brl(value: f64) -> String {
  let cents = (value * 100.0).round() as i64;
  let (sign, cents) = if cents < 0 { ("-", -cents) } else { ("", cents) };
  let digits = (cents / 100).to_string();
  let mut grouped = String::new();
  for (i, c) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      grouped.push('.');
    }
    grouped.push(c);
  }
  format!("{}R$ {},{:02}", sign, grouped, cents % 100)
}

fn text<'a>(record: &'a Value, field: &str) -> &'a str {
  record.get(field).and_then(Value::as_str).unwrap_or("")
}

fn number(record: &Value, field: &str) -> Option<f64> {
  record.get(field).and_then(Value::as_f64)
}

/// HTML body for a commercial proposal.
pub fn proposal_html(proposal: &Value, opportunity: Option<&Value>, client: Option<&Value>) -> String {
  let mut html = String::with_capacity(2048);
  html.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>");
  html.push_str(
    "body{font-family:sans-serif;margin:40px;color:#222}h1{color:#f59e0b}\
     table{width:100%;border-collapse:collapse}th,td{border-bottom:1px solid #ddd;padding:6px;text-align:left}\
     .total{font-size:1.3em;font-weight:bold;margin-top:24px}",
  );
  html.push_str("</style></head><body>");

  let _ = write!(html, "<h1>{}</h1>", escape_html(text(proposal, "name")));
  if let Some(client) = client {
    let _ = write!(html, "<p>Cliente: {}</p>", escape_html(text(client, "name")));
  }
  if let Some(opportunity) = opportunity {
    let _ = write!(
      html,
      "<p>Oportunidade: {}</p>",
      escape_html(text(opportunity, "name"))
    );
  }
  if let Some(power) = number(proposal, "power") {
    let _ = write!(html, "<p>Potência: {} kWp</p>", power);
  }

  if let Some(items) = proposal.get("items").and_then(Value::as_array) {
    html.push_str("<table><tr><th>Item</th><th>Qtd.</th><th>Valor unitário</th><th>Subtotal</th></tr>");
    for item in items {
      let quantity = number(item, "quantity").unwrap_or(1.0);
      let unit = number(item, "unitPrice").unwrap_or(0.0);
      let _ = write!(
        html,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
        escape_html(text(item, "description")),
        quantity,
        format_brl(unit),
        format_brl(quantity * unit)
      );
    }
    html.push_str("</table>");
  }

  if let Some(value) = number(proposal, "value") {
    let _ = write!(html, "<p class=\"total\">Total: {}</p>", format_brl(value));
  }
  html.push_str("</body></html>");
  html
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn formats_brazilian_currency() {
    assert_eq!(format_brl(48000.0), "R$ 48.000,00");
    assert_eq!(format_brl(1234567.891), "R$ 1.234.567,89");
    assert_eq!(format_brl(0.5), "R$ 0,50");
    assert_eq!(format_brl(-12.0), "-R$ 12,00");
  }

  #[test]
  fn proposal_html_escapes_user_text() {
    let proposal = json!({
      "name": "Proposta <A&B>",
      "value": 30000,
      "power": 8.2,
      "items": [{"description": "Inversor", "quantity": 1, "unitPrice": 6000}]
    });
    let client = json!({"name": "Maria \"Solar\""});
    let html = proposal_html(&proposal, None, Some(&client));
    assert!(html.contains("Proposta &lt;A&amp;B&gt;"));
    assert!(html.contains("Maria &quot;Solar&quot;"));
    assert!(html.contains("8.2 kWp"));
    assert!(html.contains("R$ 6.000,00"));
    assert!(html.contains("Total: R$ 30.000,00"));
  }

  #[tokio::test]
  async fn disabled_renderer_is_not_configured() {
    let err = DisabledDocuments.render_pdf("<p/>", "x.pdf").await.unwrap_err();
    assert!(matches!(err, IntegrationError::NotConfigured(_)));
  }
}
