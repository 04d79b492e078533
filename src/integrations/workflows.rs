use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{error_body, http_client, IntegrationError};

const SERVICE: &str = "Workflow";

/// A workflow trigger addressed to a set of subscribers (user ids).
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
  pub name: String,
  pub to: Vec<Subscriber>,
  pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
  pub subscriber_id: String,
}

impl WorkflowEvent {
  pub fn new(name: impl Into<String>, subscribers: impl IntoIterator<Item = String>, payload: Value) -> Self {
    Self {
      name: name.into(),
      to: subscribers
        .into_iter()
        .map(|subscriber_id| Subscriber { subscriber_id })
        .collect(),
      payload,
    }
  }
}

#[async_trait]
pub trait WorkflowClient: Send + Sync {
  fn is_configured(&self) -> bool {
    true
  }

  async fn trigger(&self, event: &WorkflowEvent) -> Result<(), IntegrationError>;
}

/// Notification-workflow service reached over HTTP (`POST {url}/v1/events/trigger`).
pub struct HttpWorkflowClient {
  client: reqwest::Client,
  base_url: String,
  api_key: String,
}

impl HttpWorkflowClient {
  pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
    Self {
      client: http_client(timeout),
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key: api_key.trim().to_string(),
    }
  }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
  async fn trigger(&self, event: &WorkflowEvent) -> Result<(), IntegrationError> {
    let url = format!("{}/v1/events/trigger", self.base_url);
    let response = self
      .client
      .post(&url)
      .header("Authorization", format!("ApiKey {}", self.api_key))
      .json(event)
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

    tracing::debug!(workflow = %event.name, recipients = event.to.len(), "Workflow triggered");
    Ok(())
  }
}

/// Stand-in when no workflow service is configured.
pub struct DisabledWorkflows;

#[async_trait]
impl WorkflowClient for DisabledWorkflows {
  fn is_configured(&self) -> bool {
    false
  }

  async fn trigger(&self, event: &WorkflowEvent) -> Result<(), IntegrationError> {
    tracing::info!(workflow = %event.name, "Workflow service not configured, skipping trigger");
    Err(IntegrationError::NotConfigured(SERVICE))
  }
}
