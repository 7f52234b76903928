use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tenant.
/// Stable across regions; the ledger row, debt status and namespaces all hang off it.
pub type TenantId = Uuid;

/// Smallest accounting unit multiplier: 1 currency unit = 1_000_000 ledger units.
pub const BASE_UNIT: i64 = 1_000_000;

/// A tenant's ledger account with balances already decrypted.
///
/// # Balances
/// - `balance`: total ever recharged (plus bonuses and incoming transfers)
/// - `deduction_balance`: total ever consumed
/// - `activity_bonus`: promotional credit, part of `balance` but never transferable
///
/// Both `balance` and `deduction_balance` only grow, except for explicit
/// transfer-out debits and reversals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: TenantId,

    /// Owner name used for namespace ownership (e.g. "alice" owns `ns-alice`)
    pub owner: String,

    pub balance: i64,
    pub deduction_balance: i64,
    pub activity_bonus: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Balance the debt tier is computed from.
    pub fn usable(&self) -> i64 {
        self.balance.saturating_sub(self.deduction_balance)
    }

    /// Balance that may leave the account through a transfer.
    pub fn transferable(&self) -> i64 {
        self.usable().saturating_sub(self.activity_bonus)
    }
}

/// How callers address an account: by stable UID or by owner name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountKey {
    Uid(TenantId),
    Owner(String),
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKey::Uid(uid) => write!(f, "{}", uid),
            AccountKey::Owner(owner) => write!(f, "{}", owner),
        }
    }
}

impl std::str::FromStr for AccountKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty account key".to_string());
        }
        match Uuid::parse_str(s) {
            Ok(uid) => Ok(AccountKey::Uid(uid)),
            Err(_) => Ok(AccountKey::Owner(s.to_string())),
        }
    }
}

impl From<TenantId> for AccountKey {
    fn from(uid: TenantId) -> Self {
        AccountKey::Uid(uid)
    }
}

/// Format ledger units as a decimal currency amount.
pub fn format_amount(units: i64) -> String {
    let sign = if units < 0 { "-" } else { "" };
    let abs = units.unsigned_abs();
    let base = BASE_UNIT as u64;
    format!("{}{}.{:06}", sign, abs / base, abs % base)
}

/// Parse a non-negative decimal currency amount ("12", "0.5") into ledger units.
pub fn parse_amount(s: &str) -> Result<i64, String> {
    let s = s.trim();
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(format!("invalid amount: {:?}", s));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(format!("invalid amount: {:?}", s));
    }
    if frac.len() > 6 {
        return Err(format!("amount {} has more than 6 decimal places", s));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| format!("amount too large: {}", s))?
    };
    let frac: i64 = format!("{:0<6}", frac)
        .parse()
        .map_err(|_| format!("invalid amount: {:?}", s))?;

    whole
        .checked_mul(BASE_UNIT)
        .and_then(|units| units.checked_add(frac))
        .ok_or_else(|| format!("amount too large: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(balance: i64, deduction: i64, bonus: i64) -> Account {
        let now = Utc::now();
        Account {
            uid: Uuid::new_v4(),
            owner: "alice".to_string(),
            balance,
            deduction_balance: deduction,
            activity_bonus: bonus,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_usable_excludes_bonus_only_for_transfers() {
        let acc = account(20 * BASE_UNIT, 5 * BASE_UNIT, 3 * BASE_UNIT);
        assert_eq!(acc.usable(), 15 * BASE_UNIT);
        assert_eq!(acc.transferable(), 12 * BASE_UNIT);
    }

    #[test]
    fn test_usable_saturates_at_extremes() {
        let reversed = account(i64::MAX - 1, -5 * BASE_UNIT, 0);
        assert_eq!(reversed.usable(), i64::MAX);
        assert_eq!(reversed.transferable(), i64::MAX);

        let overdrawn = account(i64::MIN + 1, 5 * BASE_UNIT, BASE_UNIT);
        assert_eq!(overdrawn.usable(), i64::MIN);
        assert_eq!(overdrawn.transferable(), i64::MIN);
    }

    #[test]
    fn test_account_key_parsing() {
        let uid = Uuid::new_v4();
        assert_eq!(
            uid.to_string().parse::<AccountKey>().unwrap(),
            AccountKey::Uid(uid)
        );
        assert_eq!(
            "bob".parse::<AccountKey>().unwrap(),
            AccountKey::Owner("bob".to_string())
        );
        assert!("  ".parse::<AccountKey>().is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_500_000), "1.500000");
        assert_eq!(format_amount(-250_000), "-0.250000");
        assert_eq!(format_amount(0), "0.000000");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("12"), Ok(12 * BASE_UNIT));
        assert_eq!(parse_amount("1.5"), Ok(1_500_000));
        assert_eq!(parse_amount(".25"), Ok(250_000));
        assert_eq!(parse_amount("0.000001"), Ok(1));
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("1.0000001").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount(".").is_err());
        assert!(parse_amount("99999999999999").is_err());
    }
}
