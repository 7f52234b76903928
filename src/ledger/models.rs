//! Row models for the ledger database.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::LedgerError;
use super::crypto::LedgerCipher;
use crate::types::{
    Account, DebtStatus, DebtTier, DebtTransition, TenantId, TransferRequest, TransferStatus,
};

/// Fixed-width UTC timestamp so TEXT columns compare chronologically.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

pub fn parse_uid(value: &str) -> Result<TenantId, LedgerError> {
    Uuid::parse_str(value).map_err(|e| LedgerError::Corrupt(format!("bad uid {:?}: {}", value, e)))
}

fn parse_tier(value: &str) -> Result<DebtTier, LedgerError> {
    value.parse().map_err(LedgerError::Corrupt)
}

// ============================================================================
// Accounts
// ============================================================================

/// An account row with balances still encrypted.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub uid: String,
    pub owner: String,
    pub balance: String,
    pub deduction_balance: String,
    pub activity_bonus: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl AccountRow {
    pub fn decrypt(self, cipher: &LedgerCipher) -> Result<Account, LedgerError> {
        Ok(Account {
            uid: parse_uid(&self.uid)?,
            balance: cipher.decrypt(&self.balance)?,
            deduction_balance: cipher.decrypt(&self.deduction_balance)?,
            activity_bonus: self.activity_bonus,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            owner: self.owner,
        })
    }
}

// ============================================================================
// Debt status
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct DebtStatusRow {
    pub uid: String,
    pub tier: String,
    pub previous_tier: String,
    pub updated_at: String,
    pub signal_pending: bool,
}

impl TryFrom<DebtStatusRow> for DebtStatus {
    type Error = LedgerError;

    fn try_from(row: DebtStatusRow) -> Result<Self, Self::Error> {
        Ok(DebtStatus {
            uid: parse_uid(&row.uid)?,
            tier: parse_tier(&row.tier)?,
            previous_tier: parse_tier(&row.previous_tier)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            signal_pending: row.signal_pending,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DebtTransitionRow {
    pub id: String,
    pub uid: String,
    pub previous_tier: String,
    pub current_tier: String,
    pub created_at: String,
}

impl TryFrom<DebtTransitionRow> for DebtTransition {
    type Error = LedgerError;

    fn try_from(row: DebtTransitionRow) -> Result<Self, Self::Error> {
        Ok(DebtTransition {
            id: parse_uid(&row.id)?,
            uid: parse_uid(&row.uid)?,
            previous: parse_tier(&row.previous_tier)?,
            current: parse_tier(&row.current_tier)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

// ============================================================================
// Transfers
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct TransferRow {
    pub id: String,
    pub from_uid: String,
    pub to_uid: String,
    pub amount: i64,
    pub status: String,
    pub reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<TransferRow> for TransferRequest {
    type Error = LedgerError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        Ok(TransferRequest {
            id: parse_uid(&row.id)?,
            from_uid: parse_uid(&row.from_uid)?,
            to_uid: parse_uid(&row.to_uid)?,
            amount: row.amount,
            status: row
                .status
                .parse::<TransferStatus>()
                .map_err(LedgerError::Corrupt)?,
            reason: row.reason,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}
