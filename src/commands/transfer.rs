//! Transfer command - move funds between two accounts.

use anyhow::{Context, Result};
use clap::Args;

use super::GlobalArgs;
use crate::types::{AccountKey, format_amount, parse_amount};

#[derive(Args)]
pub struct TransferCmd {
    /// Source owner name or UID
    pub from: AccountKey,

    /// Destination owner name or UID
    pub to: AccountKey,

    /// Amount in currency units (e.g. 12.5)
    #[arg(value_parser = parse_amount)]
    pub amount: i64,

    /// Move the funds at once without recording a transfer request
    #[arg(long)]
    pub direct: bool,
}

impl TransferCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let config = global.load_config()?;
        let ledger = global.open_ledger(&config).await?;

        let result = async {
            if self.direct {
                let (from, to) = ledger
                    .transfer_account(&self.from, &self.to, self.amount)
                    .await
                    .context("Transfer failed")?;
                println!(
                    "Moved {} from {} (now {}) to {} (now {})",
                    format_amount(self.amount),
                    from.owner,
                    format_amount(from.usable()),
                    to.owner,
                    format_amount(to.usable())
                );
                return Ok(());
            }

            let request = ledger
                .create_transfer(&self.from, &self.to, self.amount)
                .await
                .context("Failed to create transfer")?;

            let applied = ledger
                .apply_transfer(request.id)
                .await
                .with_context(|| format!("Transfer {} failed", request.id))?;

            println!(
                "Transfer {} {}: {} from {} to {}",
                applied.id,
                applied.status,
                format_amount(applied.amount),
                self.from,
                self.to
            );
            Ok::<_, anyhow::Error>(())
        }
        .await;

        ledger.close().await;
        result
    }
}
