//! Config command - manage the config file.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};

use super::GlobalArgs;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub command: ConfigSubCmd,
}

#[derive(Subcommand)]
pub enum ConfigSubCmd {
    /// Write a config file with every default spelled out
    Init,

    /// Set the ledger encryption key
    SetKey(SetKeyCmd),

    /// Show current configuration
    Show,
}

#[derive(Args)]
pub struct SetKeyCmd {
    /// Secret the balance cipher key is derived from
    pub key: String,
}

impl ConfigCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let path = global.config_path()?;

        match &self.command {
            ConfigSubCmd::Init => {
                if path.exists() {
                    bail!("Config already exists at {}", path.display());
                }
                Config::default().save_to(&path)?;
                println!("Wrote {}", path.display());
            }
            ConfigSubCmd::SetKey(cmd) => {
                if cmd.key.is_empty() {
                    bail!("Encryption key must not be empty");
                }
                let mut config = Config::load_from(&path)?;
                config.set_encryption_key(cmd.key.clone());
                config.save_to(&path)?;
                println!("Encryption key saved.");
            }
            ConfigSubCmd::Show => {
                let config = Config::load_from(&path)?;
                let set = |present: bool| if present { "(set)" } else { "(not set)" };

                println!("Config: {}", path.display());
                println!();
                println!("[ledger]");
                println!("database:         {}", config.database_path()?.display());
                println!(
                    "encryption_key:   {}",
                    set(config.ledger.encryption_key.is_some() || global.encryption_key.is_some())
                );
                println!("min_transfer:     {}", config.ledger.min_transfer_amount);
                println!("min_reserve:      {}", config.ledger.min_reserve);
                println!();
                println!("[debt]");
                println!("high_threshold:   {}", config.debt.high_threshold);
                println!("mid_threshold:    {}", config.debt.mid_threshold);
                println!("deletion:         {}", config.debt.deletion_threshold);
                println!();
                println!("[reconcile]");
                println!("pool_size:        {}", config.reconcile.pool_size);
                println!("max_attempts:     {}", config.reconcile.max_attempts);
                println!(
                    "shard:            {}/{}",
                    config.reconcile.shard_index, config.reconcile.shard_count
                );
                println!();
                println!("[suspension]");
                let stages: Vec<String> = config
                    .suspension
                    .stages
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                println!("stages:           {}", stages.join(", "));
                println!("debt_scheduler:   {}", config.suspension.debt_scheduler);
                println!();
                println!("[object_storage]");
                println!(
                    "endpoint:         {}",
                    config.object_storage.endpoint.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "secret_key:       {}",
                    set(config.object_storage.secret_key.is_some())
                );
            }
        }
        Ok(())
    }
}
