//! Debt status store.
//!
//! One row per tenant with the current tier and the time it was set, plus
//! an append-only transition log. A transition and its log record commit in
//! the same transaction, so every transition is recorded before anything
//! acts on it.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::ledger::{LedgerDb, LedgerError};
use crate::ledger::models::{DebtStatusRow, DebtTransitionRow, parse_uid, timestamp};
use crate::types::{DebtStatus, DebtTier, DebtTransition, TenantId};

#[derive(Debug, Clone)]
pub struct DebtStatusStore {
    db: LedgerDb,
}

impl DebtStatusStore {
    pub fn new(db: LedgerDb) -> Self {
        Self { db }
    }

    pub async fn get(&self, uid: TenantId) -> Result<Option<DebtStatus>, LedgerError> {
        sqlx::query_as::<_, DebtStatusRow>("SELECT * FROM debt_status WHERE uid = ?")
            .bind(uid.to_string())
            .fetch_optional(self.db.pool())
            .await?
            .map(DebtStatus::try_from)
            .transpose()
    }

    /// Persist `tier` for the tenant.
    ///
    /// Returns the previous tier when it changed, `None` otherwise. A tenant
    /// seen for the first time starts from `Normal`. Every change appends a
    /// transition record and raises `signal_pending`.
    pub async fn update_debt_status(
        &self,
        uid: TenantId,
        tier: DebtTier,
        now: DateTime<Utc>,
    ) -> Result<Option<DebtTier>, LedgerError> {
        let mut tx = self.db.pool().begin().await?;

        let current = sqlx::query_as::<_, DebtStatusRow>("SELECT * FROM debt_status WHERE uid = ?")
            .bind(uid.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .map(DebtStatus::try_from)
            .transpose()?;

        let previous = match current {
            Some(status) if status.tier == tier => return Ok(None),
            Some(status) => status.tier,
            None => DebtTier::Normal,
        };
        let changed = previous != tier;

        sqlx::query(
            r#"
            INSERT INTO debt_status (uid, tier, previous_tier, updated_at, signal_pending)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(uid) DO UPDATE SET
                tier = excluded.tier,
                previous_tier = excluded.previous_tier,
                updated_at = excluded.updated_at,
                signal_pending = excluded.signal_pending
            "#,
        )
        .bind(uid.to_string())
        .bind(tier.as_str())
        .bind(previous.as_str())
        .bind(timestamp(now))
        .bind(changed)
        .execute(&mut *tx)
        .await?;

        if changed {
            sqlx::query(
                r#"
                INSERT INTO debt_transitions (id, uid, previous_tier, current_tier, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::now_v7().to_string())
            .bind(uid.to_string())
            .bind(previous.as_str())
            .bind(tier.as_str())
            .bind(timestamp(now))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(changed.then_some(previous))
    }

    /// Clear the pending-signal flag once every namespace has been annotated.
    pub async fn mark_signal_delivered(&self, uid: TenantId) -> Result<(), LedgerError> {
        sqlx::query("UPDATE debt_status SET signal_pending = 0 WHERE uid = ?")
            .bind(uid.to_string())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Transition log for a tenant, oldest first.
    pub async fn history(&self, uid: TenantId) -> Result<Vec<DebtTransition>, LedgerError> {
        sqlx::query_as::<_, DebtTransitionRow>(
            "SELECT * FROM debt_transitions WHERE uid = ? ORDER BY created_at, id",
        )
        .bind(uid.to_string())
        .fetch_all(self.db.pool())
        .await?
        .into_iter()
        .map(DebtTransition::try_from)
        .collect()
    }

    /// Tenants that have sat in `tier` since before `cutoff`.
    pub async fn list_in_tier_since(
        &self,
        tier: DebtTier,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TenantId>, LedgerError> {
        let rows = sqlx::query("SELECT uid FROM debt_status WHERE tier = ? AND updated_at < ?")
            .bind(tier.as_str())
            .bind(timestamp(cutoff))
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|row| parse_uid(row.get::<&str, _>("uid")))
            .collect()
    }

    /// Tenants whose last transition has not been signalled yet.
    pub async fn list_signal_pending(&self) -> Result<Vec<TenantId>, LedgerError> {
        let rows = sqlx::query("SELECT uid FROM debt_status WHERE signal_pending = 1")
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|row| parse_uid(row.get::<&str, _>("uid")))
            .collect()
    }
}
