//! Account command - create accounts and adjust balances.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use super::GlobalArgs;
use crate::debt::DebtStatusStore;
use crate::ledger::LedgerDb;
use crate::types::{Account, AccountKey, format_amount, parse_amount};

#[derive(Args)]
pub struct AccountCmd {
    #[command(subcommand)]
    pub command: AccountSubCmd,
}

#[derive(Subcommand)]
pub enum AccountSubCmd {
    /// Create an account (no-op if it already exists)
    Create(CreateCmd),

    /// Show balances and current debt tier
    Show(ShowCmd),

    /// Add to the recharged balance
    Recharge(AmountCmd),

    /// Record consumption
    Deduct(AmountCmd),

    /// Credit a non-transferable activity bonus
    Bonus(AmountCmd),
}

#[derive(Args)]
pub struct CreateCmd {
    /// Owner name (namespace `ns-<owner>`)
    pub owner: String,

    /// Tenant UID (default: random)
    #[arg(long)]
    pub uid: Option<Uuid>,
}

#[derive(Args)]
pub struct ShowCmd {
    /// Owner name or UID
    pub account: AccountKey,
}

#[derive(Args)]
pub struct AmountCmd {
    /// Owner name or UID
    pub account: AccountKey,

    /// Amount in currency units (e.g. 12.5)
    #[arg(value_parser = parse_amount)]
    pub amount: i64,
}

impl AccountCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let ledger = global.open_ledger(&config).await?;

        let result = self.dispatch(&ledger).await;
        ledger.close().await;
        result
    }

    async fn dispatch(&self, ledger: &LedgerDb) -> Result<()> {
        match &self.command {
            AccountSubCmd::Create(cmd) => {
                let uid = cmd.uid.unwrap_or_else(Uuid::new_v4);
                let account = ledger
                    .create_account(uid, &cmd.owner)
                    .await
                    .with_context(|| format!("Failed to create account for {}", cmd.owner))?;
                println!("Account {} ({})", account.owner, account.uid);
            }
            AccountSubCmd::Show(cmd) => {
                let account = ledger.get_account(&cmd.account).await?;
                let status = DebtStatusStore::new(ledger.clone()).get(account.uid).await?;
                print_account(&account);
                match status {
                    Some(status) => println!("tier:          {}", status.tier),
                    None => println!("tier:          (not evaluated)"),
                }
            }
            AccountSubCmd::Recharge(cmd) => {
                let account = ledger.add_balance(&cmd.account, cmd.amount).await?;
                println!("Recharged {} with {}", account.owner, format_amount(cmd.amount));
                print_account(&account);
            }
            AccountSubCmd::Deduct(cmd) => {
                let account = ledger.add_deduction_balance(&cmd.account, cmd.amount).await?;
                println!("Deducted {} from {}", format_amount(cmd.amount), account.owner);
                print_account(&account);
            }
            AccountSubCmd::Bonus(cmd) => {
                let account = ledger.add_bonus(&cmd.account, cmd.amount).await?;
                println!("Credited {} bonus to {}", format_amount(cmd.amount), account.owner);
                print_account(&account);
            }
        }
        Ok(())
    }
}

fn print_account(account: &Account) {
    println!("owner:         {}", account.owner);
    println!("uid:           {}", account.uid);
    println!("balance:       {}", format_amount(account.balance));
    println!("deducted:      {}", format_amount(account.deduction_balance));
    println!("bonus:         {}", format_amount(account.activity_bonus));
    println!("usable:        {}", format_amount(account.usable()));
    println!("transferable:  {}", format_amount(account.transferable()));
}
