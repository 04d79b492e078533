//! Outbound third-party services: workflow delivery and PDF rendering.

mod documents;
mod error;
mod workflows;

use std::time::Duration;

pub use documents::{proposal_html, DisabledDocuments, DocumentRenderer, HttpDocumentRenderer};
pub use error::IntegrationError;
pub use workflows::{DisabledWorkflows, HttpWorkflowClient, Subscriber, WorkflowClient, WorkflowEvent};

/// Shared HTTP client settings for outbound calls.
fn http_client(timeout: Duration) -> reqwest::Client {
  reqwest::Client::builder()
    .timeout(timeout)
    .connect_timeout(Duration::from_secs(5))
    .build()
    .unwrap_or_else(|_| reqwest::Client::new())
}

/// Trim a response body for inclusion in an error message.
fn error_body(body: String) -> String {
  const MAX: usize = 512;
  if body.len() <= MAX {
    return body;
  }
  let mut end = MAX;
  while !body.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}...", &body[..end])
}
