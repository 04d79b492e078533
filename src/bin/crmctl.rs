use clap::Parser;
use solarcrm::cli::{run, CliArgs};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  run(CliArgs::parse()).await
}
