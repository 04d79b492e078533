//! `crmctl` administration commands. They talk to the database directly.

mod commands;

pub use commands::{run, CliArgs, Commands, PartnerAction, UserAction};
