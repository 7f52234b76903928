//! Reconcile command - one pass over the ledger and the cluster.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::GlobalArgs;
use super::runtime::ControlPlane;
use crate::debt::Refresh;
use crate::types::{AccountKey, DebtAnnotation, TenantId};

#[derive(Args)]
pub struct ReconcileCmd {
    /// Cluster state file (YAML)
    #[arg(long)]
    pub cluster: PathBuf,

    /// Only reconcile this tenant (owner name or UID)
    #[arg(long)]
    pub tenant: Option<AccountKey>,
}

impl ReconcileCmd {
    pub async fn run(&self, global: &GlobalArgs) -> Result<()> {
        let plane = ControlPlane::open(global, &self.cluster).await?;
        let result = self.reconcile(&plane).await;
        let closed = plane.close().await;
        result.and(closed)
    }

    async fn reconcile(&self, plane: &ControlPlane) -> Result<()> {
        let tenants = match &self.tenant {
            Some(key) => {
                let account = plane
                    .ledger
                    .get_account(key)
                    .await
                    .with_context(|| format!("Unknown tenant {}", key))?;
                vec![account.uid]
            }
            None => plane.ledger.list_tenants().await?,
        };

        let reconciler = &plane.reconciler;
        let report = plane
            .coordinator
            .run_pass(tenants, move |uid| async move {
                let refresh = reconciler.refresh(uid).await?;
                if let Some(refresh) = &refresh {
                    print_refresh(uid, refresh);
                }
                Ok::<_, anyhow::Error>(refresh)
            })
            .await;
        println!(
            "Tenants:    {} processed, {} failed",
            report.processed,
            report.failed + report.abandoned
        );

        let poll = plane.controller.poll_once().await?;
        println!(
            "Namespaces: {} applied, {} requeued",
            poll.applied, poll.requeued
        );

        Ok(())
    }
}

fn print_refresh(uid: TenantId, refresh: &Refresh) {
    match refresh.previous {
        Some(from) => println!("{}: {} -> {}", uid, from, refresh.tier),
        None if refresh.signal.is_some() => println!("{}: {}", uid, refresh.tier),
        None => return,
    }
    if let Some(signal) = refresh.signal {
        println!(
            "  requested {} on {} namespace(s)",
            DebtAnnotation::Requested(signal).value(),
            refresh.namespaces_updated
        );
    }
}
