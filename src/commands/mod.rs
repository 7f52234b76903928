//! CLI command implementations.

mod account;
mod config;
mod reconcile;
mod run;
mod runtime;
mod status;
mod transfer;

pub use account::AccountCmd;
pub use config::ConfigCmd;
pub use reconcile::ReconcileCmd;
pub use run::RunCmd;
pub use status::StatusCmd;
pub use transfer::TransferCmd;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::Config;
use crate::ledger::{LedgerCipher, LedgerDb};

/// Flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config file (default: ~/.config/debtctl/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger encryption key, overrides ledger.encryption_key
    #[arg(long, global = true, env = "DEBTCTL_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,
}

impl GlobalArgs {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::config_path()?),
        }
    }

    pub fn load_config(&self) -> Result<Config> {
        let path = self.config_path()?;
        Config::load_from(&path).with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Open the ledger database named by the config, creating it if needed.
    pub async fn open_ledger(&self, config: &Config) -> Result<LedgerDb> {
        let key = config.encryption_key(self.encryption_key.as_deref())?;
        let path = config.database_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        LedgerDb::open(&path, LedgerCipher::new(&key), config.ledger.policy())
            .await
            .with_context(|| format!("Failed to open ledger at {}", path.display()))
    }
}
