pub mod api;
pub mod auth;
pub mod automation;
pub mod cli;
pub mod crm;
pub mod db;
pub mod integrations;
pub mod query;
pub mod server;
pub mod types;
