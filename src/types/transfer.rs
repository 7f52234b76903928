use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

pub type TransferId = Uuid;

/// A peer-to-peer transfer between two tenant accounts.
///
/// # Lifecycle
/// 1. Created `Pending` when the user asks for it
/// 2. Applied as one ledger transaction → `Succeeded`, or rejected → `Failed`
/// 3. Still `Pending` after the expiry window → `Expired`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: TransferId,
    pub from_uid: TenantId,
    pub to_uid: TenantId,
    pub amount: i64,
    pub status: TransferStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Succeeded => "succeeded",
            TransferStatus::Failed => "failed",
            TransferStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "succeeded" => Ok(TransferStatus::Succeeded),
            "failed" => Ok(TransferStatus::Failed),
            "expired" => Ok(TransferStatus::Expired),
            _ => Err(format!("unknown transfer status: {}", s)),
        }
    }
}
