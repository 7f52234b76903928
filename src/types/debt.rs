use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

/// Debt severity tier derived from a tenant's usable balance.
///
/// Tiers are totally ordered by severity:
/// `Normal < LowBalance < CriticalBalance < Debt < DebtDeletion < FinalDeletion`.
///
/// # Partition
/// | Group          | Tiers                                  | Resources |
/// |----------------|----------------------------------------|-----------|
/// | non-debt       | Normal, LowBalance, CriticalBalance    | running   |
/// | debt           | Debt, DebtDeletion, FinalDeletion      | suspended / deleted |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum DebtTier {
    #[serde(rename = "NormalPeriod")]
    Normal,
    #[serde(rename = "LowBalancePeriod")]
    LowBalance,
    #[serde(rename = "CriticalBalancePeriod")]
    CriticalBalance,
    #[serde(rename = "DebtPeriod")]
    Debt,
    #[serde(rename = "DebtDeletionPeriod")]
    DebtDeletion,
    #[serde(rename = "FinalDeletionPeriod")]
    FinalDeletion,
}

/// Tiers in which the tenant's resources must be suspended or deleted.
pub const DEBT_STATES: [DebtTier; 3] = [
    DebtTier::Debt,
    DebtTier::DebtDeletion,
    DebtTier::FinalDeletion,
];

impl DebtTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebtTier::Normal => "NormalPeriod",
            DebtTier::LowBalance => "LowBalancePeriod",
            DebtTier::CriticalBalance => "CriticalBalancePeriod",
            DebtTier::Debt => "DebtPeriod",
            DebtTier::DebtDeletion => "DebtDeletionPeriod",
            DebtTier::FinalDeletion => "FinalDeletionPeriod",
        }
    }

    pub fn is_debt(&self) -> bool {
        DEBT_STATES.contains(self)
    }
}

impl std::fmt::Display for DebtTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DebtTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NormalPeriod" | "Normal" => Ok(DebtTier::Normal),
            "LowBalancePeriod" | "LowBalance" => Ok(DebtTier::LowBalance),
            "CriticalBalancePeriod" | "CriticalBalance" => Ok(DebtTier::CriticalBalance),
            "DebtPeriod" | "Debt" => Ok(DebtTier::Debt),
            "DebtDeletionPeriod" | "DebtDeletion" => Ok(DebtTier::DebtDeletion),
            "FinalDeletionPeriod" | "FinalDeletion" => Ok(DebtTier::FinalDeletion),
            _ => Err(format!("unknown debt tier: {}", s)),
        }
    }
}

/// Persisted debt state of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtStatus {
    pub uid: TenantId,
    pub tier: DebtTier,
    /// Tier before the most recent transition (equal to `tier` for a fresh row)
    pub previous_tier: DebtTier,
    pub updated_at: DateTime<Utc>,
    /// The namespace signal for the latest transition has not been delivered yet
    pub signal_pending: bool,
}

/// One entry of the append-only transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtTransition {
    pub id: Uuid,
    pub uid: TenantId,
    pub previous: DebtTier,
    pub current: DebtTier,
    pub created_at: DateTime<Utc>,
}
