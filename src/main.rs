//! debtctl - account ledger and debt-driven suspension control plane.

mod cli;
mod cluster;
mod commands;
mod config;
mod controller;
mod debt;
mod ledger;
mod suspend;
mod types;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Controlled by RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    cli.command.execute(&cli.global).await
}
