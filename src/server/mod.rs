mod config;
mod daemon;

pub use config::{
  AuthSection, AutomationsSection, BackendType, IntegrationsSection, LimitsSection,
  ServerConfig, ServiceSection,
};
pub use daemon::Daemon;
