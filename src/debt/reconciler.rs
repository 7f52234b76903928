//! Per-tenant debt refresh.
//!
//! Reads the ledger, recomputes the tier, persists any transition and
//! signals it to every namespace the tenant owns through the
//! `debt.sealos/status` annotation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::status::DebtStatusStore;
use super::tier::{DebtThresholds, determine_tier};
use crate::cluster::{ClusterApi, ClusterError, namespaces_owned_by, update_namespace};
use crate::ledger::{LedgerDb, LedgerError};
use crate::types::{AccountKey, DEBT_STATUS_KEY, DebtAnnotation, DebtSignal, DebtTier, TenantId};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),
}

/// Result of refreshing one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    pub tier: DebtTier,
    /// Previous tier, if this refresh changed it.
    pub previous: Option<DebtTier>,
    /// Request written to the tenant's namespaces, if any.
    pub signal: Option<DebtSignal>,
    /// Namespaces whose annotation actually changed.
    pub namespaces_updated: usize,
}

/// Namespace request for a tier transition. `None` when resources keep running.
pub fn signal_for(previous: DebtTier, current: DebtTier) -> Option<DebtSignal> {
    match (previous.is_debt(), current) {
        (_, DebtTier::FinalDeletion) => Some(DebtSignal::FinalDeletion),
        (false, tier) if tier.is_debt() => Some(DebtSignal::Suspend),
        (true, tier) if !tier.is_debt() => Some(DebtSignal::Resume),
        (true, _) => Some(DebtSignal::Suspend),
        (false, _) => None,
    }
}

pub struct Reconciler<C> {
    ledger: LedgerDb,
    status: DebtStatusStore,
    cluster: Arc<C>,
    thresholds: DebtThresholds,
    conflict_retries: u32,
}

impl<C: ClusterApi> Reconciler<C> {
    pub fn new(
        ledger: LedgerDb,
        cluster: Arc<C>,
        thresholds: DebtThresholds,
        conflict_retries: u32,
    ) -> Self {
        Self {
            status: DebtStatusStore::new(ledger.clone()),
            ledger,
            cluster,
            thresholds,
            conflict_retries,
        }
    }

    pub fn status(&self) -> &DebtStatusStore {
        &self.status
    }

    pub async fn refresh(&self, uid: TenantId) -> Result<Option<Refresh>, ReconcileError> {
        self.refresh_at(uid, Utc::now()).await
    }

    /// Refresh one tenant. Returns `None` for tenants with no consumption yet.
    ///
    /// The caller must hold the tenant's lock.
    pub async fn refresh_at(
        &self,
        uid: TenantId,
        now: DateTime<Utc>,
    ) -> Result<Option<Refresh>, ReconcileError> {
        let account = self.ledger.get_account(&AccountKey::Uid(uid)).await?;
        if account.deduction_balance == 0 {
            debug!(tenant = %uid, "no consumption recorded, skipping");
            return Ok(None);
        }

        let stored = self.status.get(uid).await?;
        let (last, elapsed) = match &stored {
            Some(status) => (
                Some(status.tier),
                (now - status.updated_at).to_std().unwrap_or(Duration::ZERO),
            ),
            None => (None, Duration::ZERO),
        };

        let tier = determine_tier(account.usable(), last, elapsed, &self.thresholds);
        let previous = self.status.update_debt_status(uid, tier, now).await?;

        let signal = match (previous, &stored) {
            (Some(from), _) => {
                info!(tenant = %uid, from = %from, to = %tier, usable = account.usable(), "debt tier changed");
                signal_for(from, tier)
            }
            (None, Some(status)) if status.signal_pending => {
                debug!(tenant = %uid, tier = %tier, "re-sending undelivered signal");
                signal_for(status.previous_tier, status.tier)
            }
            (None, _) => None,
        };
        let pending = previous.is_some() || stored.as_ref().is_some_and(|s| s.signal_pending);

        let mut namespaces_updated = 0;
        if let Some(signal) = signal {
            namespaces_updated = self.signal(&account.owner, signal).await?;
        }
        if pending {
            self.status.mark_signal_delivered(uid).await?;
        }

        Ok(Some(Refresh {
            tier,
            previous,
            signal,
            namespaces_updated,
        }))
    }

    /// Write the request to every namespace owned by `owner`.
    async fn signal(&self, owner: &str, signal: DebtSignal) -> Result<usize, ClusterError> {
        let value = DebtAnnotation::Requested(signal).value();
        let mut updated = 0;

        for namespace in namespaces_owned_by(&*self.cluster, owner).await? {
            let written = update_namespace(
                &*self.cluster,
                &namespace.name,
                self.conflict_retries,
                |ns| {
                    if ns.annotation(DEBT_STATUS_KEY) == Some(value.as_str()) {
                        return false;
                    }
                    ns.annotations
                        .insert(DEBT_STATUS_KEY.to_string(), value.clone());
                    true
                },
            )
            .await?;

            if written.is_some() {
                info!(namespace = %namespace.name, status = %value, "debt status annotated");
                updated += 1;
            }
        }

        Ok(updated)
    }
}
