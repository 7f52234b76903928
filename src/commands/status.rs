//! Status command - show debt tiers and transition history.

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;

use super::GlobalArgs;
use crate::debt::DebtStatusStore;
use crate::ledger::LedgerDb;
use crate::types::{AccountKey, DebtTier, format_amount};

#[derive(Args)]
pub struct StatusCmd {
    /// Owner name or UID
    pub account: Option<AccountKey>,

    /// List every tenant currently in this tier instead
    #[arg(long, value_enum, conflicts_with = "account")]
    pub tier: Option<DebtTier>,
}

impl StatusCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        if self.account.is_none() && self.tier.is_none() {
            bail!("Pass an account or --tier");
        }

        let config = global.load_config()?;
        let ledger = global.open_ledger(&config).await?;

        let result = match (&self.account, self.tier) {
            (Some(key), _) => show_tenant(&ledger, key).await,
            (None, Some(tier)) => list_tier(&ledger, tier).await,
            (None, None) => Ok(()),
        };
        ledger.close().await;
        result
    }
}

async fn show_tenant(ledger: &LedgerDb, key: &AccountKey) -> Result<()> {
    let account = ledger.get_account(key).await?;
    let store = DebtStatusStore::new(ledger.clone());

    println!("{} ({})", account.owner, account.uid);
    println!("usable:  {}", format_amount(account.usable()));

    let Some(status) = store.get(account.uid).await? else {
        println!("tier:    (not evaluated)");
        return Ok(());
    };

    println!("tier:    {} (since {})", status.tier, status.updated_at.to_rfc3339());
    if status.signal_pending {
        println!("         namespace signal not delivered yet");
    }

    let history = store.history(account.uid).await?;
    if !history.is_empty() {
        println!();
        println!("History ({}):", history.len());
        for transition in &history {
            println!(
                "  {}  {} -> {}",
                transition.created_at.to_rfc3339(),
                transition.previous,
                transition.current
            );
        }
    }
    Ok(())
}

async fn list_tier(ledger: &LedgerDb, tier: DebtTier) -> Result<()> {
    let store = DebtStatusStore::new(ledger.clone());
    let tenants = store.list_in_tier_since(tier, Utc::now()).await?;

    if tenants.is_empty() {
        println!("No tenants in {}.", tier);
        return Ok(());
    }

    println!("{} ({}):", tier, tenants.len());
    for uid in tenants {
        match ledger.get_account(&AccountKey::Uid(uid)).await {
            Ok(account) => println!(
                "  {:<24} {}  usable {}",
                account.owner,
                uid,
                format_amount(account.usable())
            ),
            Err(e) => println!("  {:<24} {}  ({})", "?", uid, e),
        }
    }
    Ok(())
}
