//! Debt tier calculation.

use std::time::Duration;

use crate::types::DebtTier;

/// Tier boundaries and aging periods, all in ledger units / wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebtThresholds {
    pub high: i64,
    pub mid: i64,
    /// Debt depth (as a positive amount) before `DebtDeletion` may start.
    pub deletion: i64,
    pub debt_deletion_period: Duration,
    pub final_deletion_period: Duration,
}

impl Default for DebtThresholds {
    fn default() -> Self {
        crate::config::DebtConfig::default().thresholds()
    }
}

/// Map a usable balance to a tier.
///
/// Positive balances map directly. Once the balance is exhausted the tenant
/// ages through the debt tiers: `last` is the stored tier (`None` for a
/// tenant never evaluated before) and `elapsed` is the time since it was set.
///
/// | usable                 | last             | elapsed          | tier            |
/// |------------------------|------------------|------------------|-----------------|
/// | ≥ high                 | any              | any              | Normal          |
/// | > mid                  | any              | any              | LowBalance      |
/// | > 0                    | any              | any              | CriticalBalance |
/// | ≤ 0                    | non-debt / none  | any              | Debt            |
/// | ≤ −deletion            | Debt             | ≥ deletion period| DebtDeletion    |
/// | ≤ 0                    | DebtDeletion     | ≥ final period   | FinalDeletion   |
/// | ≤ 0                    | otherwise        |                  | last            |
pub fn determine_tier(
    usable: i64,
    last: Option<DebtTier>,
    elapsed: Duration,
    thresholds: &DebtThresholds,
) -> DebtTier {
    if usable > 0 {
        return if usable >= thresholds.high {
            DebtTier::Normal
        } else if usable > thresholds.mid {
            DebtTier::LowBalance
        } else {
            DebtTier::CriticalBalance
        };
    }

    match last {
        None => DebtTier::Debt,
        Some(tier) if !tier.is_debt() => DebtTier::Debt,
        Some(DebtTier::Debt)
            if usable <= -thresholds.deletion && elapsed >= thresholds.debt_deletion_period =>
        {
            DebtTier::DebtDeletion
        }
        Some(DebtTier::DebtDeletion) if elapsed >= thresholds.final_deletion_period => {
            DebtTier::FinalDeletion
        }
        Some(tier) => tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BASE_UNIT;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn t() -> DebtThresholds {
        DebtThresholds::default()
    }

    #[test]
    fn test_positive_boundaries() {
        let t = t();
        assert_eq!(determine_tier(1, None, DAY, &t), DebtTier::CriticalBalance);
        assert_eq!(
            determine_tier(5 * BASE_UNIT, None, DAY, &t),
            DebtTier::CriticalBalance
        );
        assert_eq!(
            determine_tier(5 * BASE_UNIT + 1, None, DAY, &t),
            DebtTier::LowBalance
        );
        assert_eq!(
            determine_tier(10 * BASE_UNIT - 1, None, DAY, &t),
            DebtTier::LowBalance
        );
        assert_eq!(determine_tier(10 * BASE_UNIT, None, DAY, &t), DebtTier::Normal);
    }

    #[test]
    fn test_positive_balance_ignores_history() {
        let t = t();
        assert_eq!(
            determine_tier(50 * BASE_UNIT, Some(DebtTier::FinalDeletion), 30 * DAY, &t),
            DebtTier::Normal
        );
    }

    #[test]
    fn test_exhausted_balance_enters_debt() {
        let t = t();
        assert_eq!(determine_tier(0, None, Duration::ZERO, &t), DebtTier::Debt);
        assert_eq!(
            determine_tier(-3, Some(DebtTier::LowBalance), Duration::ZERO, &t),
            DebtTier::Debt
        );
    }

    #[test]
    fn test_aging() {
        let t = t();
        assert_eq!(determine_tier(-1, Some(DebtTier::Debt), 6 * DAY, &t), DebtTier::Debt);
        assert_eq!(
            determine_tier(-1, Some(DebtTier::Debt), 7 * DAY, &t),
            DebtTier::DebtDeletion
        );
        assert_eq!(
            determine_tier(-1, Some(DebtTier::DebtDeletion), 6 * DAY, &t),
            DebtTier::DebtDeletion
        );
        assert_eq!(
            determine_tier(-1, Some(DebtTier::DebtDeletion), 7 * DAY, &t),
            DebtTier::FinalDeletion
        );
        assert_eq!(
            determine_tier(-1, Some(DebtTier::FinalDeletion), 100 * DAY, &t),
            DebtTier::FinalDeletion
        );
    }

    #[test]
    fn test_deletion_threshold_holds_shallow_debt() {
        let t = DebtThresholds {
            deletion: 2 * BASE_UNIT,
            ..t()
        };
        assert_eq!(
            determine_tier(-BASE_UNIT, Some(DebtTier::Debt), 30 * DAY, &t),
            DebtTier::Debt
        );
        assert_eq!(
            determine_tier(-2 * BASE_UNIT, Some(DebtTier::Debt), 30 * DAY, &t),
            DebtTier::DebtDeletion
        );
    }

    #[test]
    fn test_total_and_deterministic() {
        let t = t();
        for usable in [-20 * BASE_UNIT, -1, 0, 1, 7 * BASE_UNIT, 20 * BASE_UNIT] {
            for last in [None, Some(DebtTier::Normal), Some(DebtTier::Debt)] {
                assert_eq!(
                    determine_tier(usable, last, DAY, &t),
                    determine_tier(usable, last, DAY, &t)
                );
            }
        }
    }
}
