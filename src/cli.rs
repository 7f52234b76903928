//! CLI argument definitions.

use clap::{Parser, Subcommand};

use crate::commands::{
    AccountCmd, ConfigCmd, GlobalArgs, ReconcileCmd, RunCmd, StatusCmd, TransferCmd,
};

#[derive(Parser)]
#[command(name = "debtctl")]
#[command(about = "Account ledger and debt-driven suspension control plane")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create accounts and move balances
    Account(AccountCmd),

    /// Transfer funds between two accounts
    Transfer(TransferCmd),

    /// Show a tenant's debt tier and transition history
    Status(StatusCmd),

    /// Run one reconciliation pass against a cluster state file
    Reconcile(ReconcileCmd),

    /// Run every reconcile loop and the namespace controller until Ctrl+C
    Run(RunCmd),

    /// Manage configuration
    Config(ConfigCmd),
}

impl Command {
    pub async fn execute(&self, global: &GlobalArgs) -> anyhow::Result<()> {
        match self {
            Command::Account(cmd) => cmd.run(global).await,
            Command::Transfer(cmd) => cmd.run(global).await,
            Command::Status(cmd) => cmd.run(global).await,
            Command::Reconcile(cmd) => cmd.run(global).await,
            Command::Run(cmd) => cmd.run(global).await,
            Command::Config(cmd) => cmd.run(global).await,
        }
    }
}
