use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrationError {
  #[error("{0} service is not configured")]
  NotConfigured(&'static str),
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("{service} responded with {status}: {body}")]
  Status {
    service: &'static str,
    status: u16,
    body: String,
  },
}
