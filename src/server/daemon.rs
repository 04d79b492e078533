use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{ServerConfig, ServiceSection};
use crate::api::{self, ApiSettings, AppState};
use crate::auth::AuthService;
use crate::automation::AutomationEngine;
use crate::crm::Repository;
use crate::db::DatabaseBackend;
use crate::integrations::{
  DisabledDocuments, DisabledWorkflows, DocumentRenderer, HttpDocumentRenderer,
  HttpWorkflowClient, WorkflowClient,
};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Daemon {
  config: ServerConfig,
  backend: Arc<dyn DatabaseBackend>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Daemon {
  pub fn new(config: ServerConfig, backend: Arc<dyn DatabaseBackend>) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      config,
      backend,
      shutdown_tx,
    }
  }

  /// Trigger graceful shutdown of the HTTP server and background tasks
  pub fn shutdown(&self) {
    tracing::info!("Initiating graceful shutdown...");
    let _ = self.shutdown_tx.send(());
  }

  /// Application state wired from config.
  pub fn state(&self) -> AppState {
    AppState::new(
      self.backend.clone(),
      Arc::new(AuthService::new(
        self.backend.clone(),
        self.config.auth.session_ttl(),
      )),
      documents_from(&self.config.integrations.documents),
      ApiSettings::from_config(&self.config),
    )
  }

  pub async fn run(&self) -> Result<(), anyhow::Error> {
    tracing::info!("Initializing database schema...");
    self.backend.init_schema().await?;

    tracing::info!("Starting change listener...");
    self.backend.start_change_listener().await?;

    if self.config.automations.enabled {
      let engine = Arc::new(AutomationEngine::new(
        Repository::new(self.backend.clone()),
        workflows_from(&self.config.integrations.workflows),
      ));
      let changes = self.backend.subscribe_changes();
      let shutdown = self.shutdown_tx.subscribe();
      tokio::spawn(engine.run(changes, shutdown));
    } else {
      tracing::info!("Automations disabled");
    }

    let backend = self.backend.clone();
    let mut shutdown = self.shutdown_tx.subscribe();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
      loop {
        tokio::select! {
          _ = shutdown.recv() => break,
          _ = interval.tick() => match backend.cleanup_expired_sessions().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Removed {} expired sessions", n),
            Err(e) => tracing::warn!("Session cleanup failed: {}", e),
          },
        }
      }
    });

    let app = api::router(self.state());
    let addr = self.config.address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("solarcrm API listening on {}", addr);

    let mut shutdown = self.shutdown_tx.subscribe();
    axum::serve(listener, app.into_make_service())
      .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
        tracing::info!("HTTP server shutting down");
      })
      .await?;
    Ok(())
  }
}

fn workflows_from(section: &ServiceSection) -> Arc<dyn WorkflowClient> {
  match section.endpoint() {
    Some(url) => {
      tracing::info!("Workflow service at {}", url);
      Arc::new(HttpWorkflowClient::new(url, &section.api_key, section.timeout()))
    }
    None => {
      tracing::info!("Workflow service not configured, workflow actions will be skipped");
      Arc::new(DisabledWorkflows)
    }
  }
}

fn documents_from(section: &ServiceSection) -> Arc<dyn DocumentRenderer> {
  match section.endpoint() {
    Some(url) => Arc::new(HttpDocumentRenderer::new(url, &section.api_key, section.timeout())),
    None => Arc::new(DisabledDocuments),
  }
}
