//! Account ledger.
//!
//! One row per tenant holding encrypted `balance` and `deduction_balance`.
//! Every mutation runs inside a single SQLite transaction; the pool has one
//! connection so transactions for the same tenant are serialized.
//!
//! Also stores the debt status rows and transfer requests so a tier
//! transition and its history record commit together.

mod crypto;
mod db;
pub(crate) mod models;

pub use crypto::{CryptoError, LedgerCipher};
pub use db::LedgerDb;

use crate::types::AccountKey;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("account not found: {0}")]
    NotFound(AccountKey),

    #[error("transfer not found: {0}")]
    TransferNotFound(uuid::Uuid),

    #[error("insufficient balance: {available} transferable, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("owner {0} is already bound to another account")]
    OwnerTaken(String),

    #[error("ledger cipher error: {0}")]
    Decryption(#[from] CryptoError),

    #[error("amount overflow")]
    Overflow,

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Limits applied to peer-to-peer transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Smallest amount a single transfer may move.
    pub min_amount: i64,
    /// Transferable balance the source must retain afterwards.
    pub min_reserve: i64,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            min_amount: crate::types::BASE_UNIT,
            min_reserve: 10 * crate::types::BASE_UNIT,
        }
    }
}
