//! SQLite storage for the account ledger.

use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::crypto::LedgerCipher;
use super::models::{AccountRow, TransferRow, parse_uid, timestamp};
use super::{LedgerError, TransferPolicy};
use crate::types::{Account, AccountKey, TenantId, TransferId, TransferRequest, TransferStatus};

/// Ledger database handle. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    pool: SqlitePool,
    cipher: LedgerCipher,
    policy: TransferPolicy,
}

impl LedgerDb {
    /// Open or create the database at the given path.
    pub async fn open(
        db_path: &Path,
        cipher: LedgerCipher,
        policy: TransferPolicy,
    ) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        Self::connect(options, cipher, policy).await
    }

    /// Open a private in-memory database.
    #[cfg(test)]
    pub async fn open_in_memory(
        cipher: LedgerCipher,
        policy: TransferPolicy,
    ) -> Result<Self, LedgerError> {
        let options: SqliteConnectOptions = "sqlite::memory:".parse()?;
        Self::connect(options, cipher, policy).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        cipher: LedgerCipher,
        policy: TransferPolicy,
    ) -> Result<Self, LedgerError> {
        // A single long-lived connection: serializes transactions and keeps
        // an in-memory database alive for the lifetime of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            cipher,
            policy,
        };
        db.migrate().await?;

        Ok(db)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                uid TEXT PRIMARY KEY,
                owner TEXT NOT NULL UNIQUE,
                balance TEXT NOT NULL,
                deduction_balance TEXT NOT NULL,
                activity_bonus INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_updated ON accounts(updated_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS debt_status (
                uid TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                previous_tier TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                signal_pending INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_debt_status_tier ON debt_status(tier, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS debt_transitions (
                id TEXT PRIMARY KEY,
                uid TEXT NOT NULL,
                previous_tier TEXT NOT NULL,
                current_tier TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_debt_transitions_uid ON debt_transitions(uid, created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                id TEXT PRIMARY KEY,
                from_uid TEXT NOT NULL,
                to_uid TEXT NOT NULL,
                amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transfers_status ON transfers(status, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Account Operations ====================

    /// Create the account if absent. Returns the stored account either way.
    pub async fn create_account(&self, uid: TenantId, owner: &str) -> Result<Account, LedgerError> {
        let now = timestamp(Utc::now());
        let zero = self.cipher.encrypt(0)?;

        sqlx::query(
            r#"
            INSERT INTO accounts (uid, owner, balance, deduction_balance, activity_bonus, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(uid.to_string())
        .bind(owner)
        .bind(&zero)
        .bind(&zero)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        match self.get_account(&AccountKey::Uid(uid)).await {
            Err(LedgerError::NotFound(_)) => Err(LedgerError::OwnerTaken(owner.to_string())),
            other => other,
        }
    }

    /// Load and decrypt an account.
    pub async fn get_account(&self, key: &AccountKey) -> Result<Account, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        fetch_account(&mut conn, key).await?.decrypt(&self.cipher)
    }

    /// Add `amount` (may be negative) to the recharged balance.
    pub async fn add_balance(&self, key: &AccountKey, amount: i64) -> Result<Account, LedgerError> {
        self.mutate(key, |account| {
            account.balance = checked(account.balance, amount)?;
            Ok(())
        })
        .await
    }

    /// Add `amount` (may be negative) to the consumed balance.
    pub async fn add_deduction_balance(
        &self,
        key: &AccountKey,
        amount: i64,
    ) -> Result<Account, LedgerError> {
        self.mutate(key, |account| {
            account.deduction_balance = checked(account.deduction_balance, amount)?;
            Ok(())
        })
        .await
    }

    /// Credit a promotional bonus: counts toward the balance, never transferable.
    pub async fn add_bonus(&self, key: &AccountKey, amount: i64) -> Result<Account, LedgerError> {
        self.mutate(key, |account| {
            account.balance = checked(account.balance, amount)?;
            account.activity_bonus = checked(account.activity_bonus, amount)?;
            Ok(())
        })
        .await
    }

    /// Move `amount` from one account to another in a single transaction.
    ///
    /// Fails with [`LedgerError::InsufficientBalance`] without touching either
    /// account if the source would keep less than the minimum reserve.
    pub async fn transfer_account(
        &self,
        from: &AccountKey,
        to: &AccountKey,
        amount: i64,
    ) -> Result<(Account, Account), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let accounts = self.transfer_in(&mut tx, from, to, amount).await?;
        tx.commit().await?;
        Ok(accounts)
    }

    /// Tenants whose account changed in `[start, end)`.
    pub async fn list_tenants_updated_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TenantId>, LedgerError> {
        let rows = sqlx::query("SELECT uid FROM accounts WHERE updated_at >= ? AND updated_at < ?")
            .bind(timestamp(start))
            .bind(timestamp(end))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uid(row.get::<&str, _>("uid")))
            .collect()
    }

    /// Every tenant with an account.
    pub async fn list_tenants(&self) -> Result<Vec<TenantId>, LedgerError> {
        let rows = sqlx::query("SELECT uid FROM accounts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_uid(row.get::<&str, _>("uid")))
            .collect()
    }

    async fn mutate<F>(&self, key: &AccountKey, apply: F) -> Result<Account, LedgerError>
    where
        F: FnOnce(&mut Account) -> Result<(), LedgerError>,
    {
        let mut tx = self.pool.begin().await?;
        let mut account = fetch_account(&mut tx, key).await?.decrypt(&self.cipher)?;

        apply(&mut account)?;
        account.updated_at = stored_now();

        self.store_account(&mut tx, &account).await?;
        tx.commit().await?;

        Ok(account)
    }

    async fn transfer_in(
        &self,
        conn: &mut SqliteConnection,
        from: &AccountKey,
        to: &AccountKey,
        amount: i64,
    ) -> Result<(Account, Account), LedgerError> {
        if amount <= 0 || amount < self.policy.min_amount {
            return Err(LedgerError::InvalidTransfer(format!(
                "amount {} is below the minimum of {}",
                amount, self.policy.min_amount
            )));
        }

        let mut source = fetch_account(conn, from).await?.decrypt(&self.cipher)?;
        let mut target = fetch_account(conn, to).await?.decrypt(&self.cipher)?;

        if source.uid == target.uid {
            return Err(LedgerError::InvalidTransfer(
                "source and destination are the same account".to_string(),
            ));
        }

        let required = checked(amount, self.policy.min_reserve)?;
        let available = source.transferable();
        if available < required {
            return Err(LedgerError::InsufficientBalance {
                available,
                required,
            });
        }

        let now = stored_now();
        source.balance = checked(source.balance, -amount)?;
        source.updated_at = now;
        target.balance = checked(target.balance, amount)?;
        target.updated_at = now;

        self.store_account(conn, &source).await?;
        self.store_account(conn, &target).await?;

        Ok((source, target))
    }

    async fn store_account(
        &self,
        conn: &mut SqliteConnection,
        account: &Account,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?, deduction_balance = ?, activity_bonus = ?, updated_at = ?
            WHERE uid = ?
            "#,
        )
        .bind(self.cipher.encrypt(account.balance)?)
        .bind(self.cipher.encrypt(account.deduction_balance)?)
        .bind(account.activity_bonus)
        .bind(timestamp(account.updated_at))
        .bind(account.uid.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // ==================== Transfer Requests ====================

    /// Record a pending transfer between two existing accounts.
    pub async fn create_transfer(
        &self,
        from: &AccountKey,
        to: &AccountKey,
        amount: i64,
    ) -> Result<TransferRequest, LedgerError> {
        let source = self.get_account(from).await?;
        let target = self.get_account(to).await?;

        let now = stored_now();
        let request = TransferRequest {
            id: Uuid::new_v4(),
            from_uid: source.uid,
            to_uid: target.uid,
            amount,
            status: TransferStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO transfers (id, from_uid, to_uid, amount, status, reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.from_uid.to_string())
        .bind(request.to_uid.to_string())
        .bind(request.amount)
        .bind(request.status.as_str())
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    /// Apply a pending transfer. A rejected transfer is marked `Failed` with
    /// the rejection reason; storage failures leave it `Pending`.
    pub async fn apply_transfer(&self, id: TransferId) -> Result<TransferRequest, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let request = TransferRequest::try_from(fetch_transfer(&mut tx, id).await?)?;

        if request.status.is_terminal() {
            return Err(LedgerError::InvalidTransfer(format!(
                "transfer {} is already {}",
                id, request.status
            )));
        }

        let outcome = self
            .transfer_in(
                &mut tx,
                &AccountKey::Uid(request.from_uid),
                &AccountKey::Uid(request.to_uid),
                request.amount,
            )
            .await;

        match outcome {
            Ok(_) => {
                set_transfer_status(&mut tx, id, TransferStatus::Succeeded, None).await?;
                tx.commit().await?;
                self.get_transfer(id).await
            }
            Err(err @ LedgerError::Database(_)) => Err(err),
            Err(err) => {
                tx.rollback().await?;
                let mut conn = self.pool.acquire().await?;
                set_transfer_status(&mut conn, id, TransferStatus::Failed, Some(&err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<TransferRequest, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        TransferRequest::try_from(fetch_transfer(&mut conn, id).await?)
    }

    /// Mark pending transfers created before `cutoff` as expired.
    pub async fn expire_transfers(&self, cutoff: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE transfers
            SET status = ?, reason = 'expired before being applied', updated_at = ?
            WHERE status = ? AND created_at < ?
            "#,
        )
        .bind(TransferStatus::Expired.as_str())
        .bind(timestamp(Utc::now()))
        .bind(TransferStatus::Pending.as_str())
        .bind(timestamp(cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Current time at the precision `timestamp` stores, so returned rows equal re-read ones.
fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn checked(value: i64, delta: i64) -> Result<i64, LedgerError> {
    value.checked_add(delta).ok_or(LedgerError::Overflow)
}

async fn fetch_account(
    conn: &mut SqliteConnection,
    key: &AccountKey,
) -> Result<AccountRow, LedgerError> {
    let row = match key {
        AccountKey::Uid(uid) => {
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE uid = ?")
                .bind(uid.to_string())
                .fetch_optional(&mut *conn)
                .await?
        }
        AccountKey::Owner(owner) => {
            sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE owner = ?")
                .bind(owner)
                .fetch_optional(&mut *conn)
                .await?
        }
    };

    row.ok_or_else(|| LedgerError::NotFound(key.clone()))
}

async fn fetch_transfer(
    conn: &mut SqliteConnection,
    id: TransferId,
) -> Result<TransferRow, LedgerError> {
    sqlx::query_as::<_, TransferRow>("SELECT * FROM transfers WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::TransferNotFound(id))
}

async fn set_transfer_status(
    conn: &mut SqliteConnection,
    id: TransferId,
    status: TransferStatus,
    reason: Option<&str>,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE transfers SET status = ?, reason = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(status.as_str())
        .bind(reason)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .bind(TransferStatus::Pending.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BASE_UNIT;
    use secrecy::SecretString;

    fn cipher(secret: &str) -> LedgerCipher {
        LedgerCipher::new(&SecretString::from(secret.to_string()))
    }

    async fn test_db() -> LedgerDb {
        LedgerDb::open_in_memory(cipher("test-key"), TransferPolicy::default())
            .await
            .unwrap()
    }

    fn owner(name: &str) -> AccountKey {
        AccountKey::Owner(name.to_string())
    }

    async fn funded(db: &LedgerDb, name: &str, units: i64) -> Account {
        db.create_account(Uuid::new_v4(), name).await.unwrap();
        db.add_balance(&owner(name), units * BASE_UNIT).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_account_is_idempotent() {
        let db = test_db().await;
        let uid = Uuid::new_v4();

        let first = db.create_account(uid, "alice").await.unwrap();
        db.add_balance(&owner("alice"), 5).await.unwrap();
        let second = db.create_account(uid, "alice").await.unwrap();

        assert_eq!(first.uid, second.uid);
        assert_eq!(second.balance, 5);
    }

    #[tokio::test]
    async fn test_owner_bound_to_other_uid() {
        let db = test_db().await;
        db.create_account(Uuid::new_v4(), "alice").await.unwrap();

        let err = db.create_account(Uuid::new_v4(), "alice").await.unwrap_err();
        assert!(matches!(err, LedgerError::OwnerTaken(_)));
    }

    #[tokio::test]
    async fn test_get_missing_account() {
        let db = test_db().await;
        let err = db.get_account(&owner("nobody")).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_add_balance_and_deduction() {
        let db = test_db().await;
        let uid = Uuid::new_v4();
        db.create_account(uid, "alice").await.unwrap();

        db.add_balance(&AccountKey::Uid(uid), 30 * BASE_UNIT).await.unwrap();
        db.add_deduction_balance(&owner("alice"), 12 * BASE_UNIT)
            .await
            .unwrap();
        let account = db.add_deduction_balance(&owner("alice"), -2 * BASE_UNIT)
            .await
            .unwrap();

        assert_eq!(account.balance, 30 * BASE_UNIT);
        assert_eq!(account.deduction_balance, 10 * BASE_UNIT);
        assert_eq!(db.get_account(&owner("alice")).await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_bonus_is_not_transferable() {
        let db = test_db().await;
        funded(&db, "alice", 15).await;
        funded(&db, "bob", 0).await;
        db.add_bonus(&owner("alice"), 10 * BASE_UNIT).await.unwrap();

        let alice = db.get_account(&owner("alice")).await.unwrap();
        assert_eq!(alice.balance, 25 * BASE_UNIT);
        assert_eq!(alice.transferable(), 15 * BASE_UNIT);

        // 15 transferable, 10 reserve: only 5 may leave.
        let err = db
            .transfer_account(&owner("alice"), &owner("bob"), 6 * BASE_UNIT)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        db.transfer_account(&owner("alice"), &owner("bob"), 5 * BASE_UNIT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transfer_is_zero_sum() {
        let db = test_db().await;
        funded(&db, "alice", 40).await;
        funded(&db, "bob", 3).await;
        db.add_deduction_balance(&owner("bob"), BASE_UNIT).await.unwrap();

        let before: i64 = [
            db.get_account(&owner("alice")).await.unwrap().usable(),
            db.get_account(&owner("bob")).await.unwrap().usable(),
        ]
        .iter()
        .sum();

        let (alice, bob) = db
            .transfer_account(&owner("alice"), &owner("bob"), 20 * BASE_UNIT)
            .await
            .unwrap();

        assert_eq!(alice.balance, 20 * BASE_UNIT);
        assert_eq!(bob.balance, 23 * BASE_UNIT);
        assert_eq!(alice.usable() + bob.usable(), before);
    }

    #[tokio::test]
    async fn test_insufficient_balance_mutates_nothing() {
        let db = test_db().await;
        let alice = funded(&db, "alice", 20).await;
        let bob = funded(&db, "bob", 1).await;

        let err = db
            .transfer_account(&owner("alice"), &owner("bob"), 11 * BASE_UNIT)
            .await
            .unwrap_err();

        match err {
            LedgerError::InsufficientBalance {
                available,
                required,
            } => {
                assert_eq!(available, 20 * BASE_UNIT);
                assert_eq!(required, 21 * BASE_UNIT);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.get_account(&owner("alice")).await.unwrap(), alice);
        assert_eq!(db.get_account(&owner("bob")).await.unwrap(), bob);
    }

    #[tokio::test]
    async fn test_returned_rows_match_stored_rows() {
        let db = test_db().await;
        funded(&db, "alice", 30).await;
        funded(&db, "bob", 0).await;

        let alice = db.add_bonus(&owner("alice"), BASE_UNIT).await.unwrap();
        assert_eq!(db.get_account(&owner("alice")).await.unwrap(), alice);

        let (alice, bob) = db
            .transfer_account(&owner("alice"), &owner("bob"), 5 * BASE_UNIT)
            .await
            .unwrap();
        assert_eq!(db.get_account(&owner("alice")).await.unwrap(), alice);
        assert_eq!(db.get_account(&owner("bob")).await.unwrap(), bob);
        assert_eq!(alice.updated_at.timestamp_subsec_nanos() % 1_000, 0);

        let request = db
            .create_transfer(&owner("alice"), &owner("bob"), 2 * BASE_UNIT)
            .await
            .unwrap();
        assert_eq!(db.get_transfer(request.id).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_invalid_transfers() {
        let db = test_db().await;
        let alice = funded(&db, "alice", 50).await;

        let same = db
            .transfer_account(&owner("alice"), &AccountKey::Uid(alice.uid), 2 * BASE_UNIT)
            .await
            .unwrap_err();
        assert!(matches!(same, LedgerError::InvalidTransfer(_)));

        funded(&db, "bob", 0).await;
        let tiny = db
            .transfer_account(&owner("alice"), &owner("bob"), BASE_UNIT - 1)
            .await
            .unwrap_err();
        assert!(matches!(tiny, LedgerError::InvalidTransfer(_)));

        let missing = db
            .transfer_account(&owner("alice"), &owner("carol"), 2 * BASE_UNIT)
            .await
            .unwrap_err();
        assert!(matches!(missing, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_deductions_are_not_lost() {
        let db = test_db().await;
        funded(&db, "alice", 0).await;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.add_deduction_balance(&owner("alice"), 7).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let alice = db.get_account(&owner("alice")).await.unwrap();
        assert_eq!(alice.deduction_balance, 140);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite");

        let db = LedgerDb::open(&path, cipher("key-a"), TransferPolicy::default())
            .await
            .unwrap();
        db.create_account(Uuid::new_v4(), "alice").await.unwrap();
        db.close().await;

        let db = LedgerDb::open(&path, cipher("key-b"), TransferPolicy::default())
            .await
            .unwrap();
        let err = db.get_account(&owner("alice")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_transfer_request_lifecycle() {
        let db = test_db().await;
        funded(&db, "alice", 30).await;
        funded(&db, "bob", 0).await;

        let ok = db
            .create_transfer(&owner("alice"), &owner("bob"), 5 * BASE_UNIT)
            .await
            .unwrap();
        assert_eq!(ok.status, TransferStatus::Pending);
        let ok = db.apply_transfer(ok.id).await.unwrap();
        assert_eq!(ok.status, TransferStatus::Succeeded);

        // Re-applying a terminal request is rejected and moves no money.
        assert!(db.apply_transfer(ok.id).await.is_err());
        assert_eq!(
            db.get_account(&owner("bob")).await.unwrap().balance,
            5 * BASE_UNIT
        );

        let too_big = db
            .create_transfer(&owner("alice"), &owner("bob"), 50 * BASE_UNIT)
            .await
            .unwrap();
        assert!(db.apply_transfer(too_big.id).await.is_err());
        let failed = db.get_transfer(too_big.id).await.unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert!(failed.reason.unwrap().contains("insufficient"));
    }

    #[tokio::test]
    async fn test_expire_stale_transfers() {
        let db = test_db().await;
        funded(&db, "alice", 30).await;
        funded(&db, "bob", 0).await;

        let stale = db
            .create_transfer(&owner("alice"), &owner("bob"), 2 * BASE_UNIT)
            .await
            .unwrap();

        assert_eq!(
            db.expire_transfers(Utc::now() - chrono::Duration::hours(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            db.expire_transfers(Utc::now() + chrono::Duration::seconds(1))
                .await
                .unwrap(),
            1
        );

        let expired = db.get_transfer(stale.id).await.unwrap();
        assert_eq!(expired.status, TransferStatus::Expired);
        assert!(db.apply_transfer(stale.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_tenants_updated_between() {
        let db = test_db().await;
        let start = Utc::now() - chrono::Duration::seconds(1);
        let alice = funded(&db, "alice", 1).await;
        let end = Utc::now() + chrono::Duration::seconds(1);

        let active = db.list_tenants_updated_between(start, end).await.unwrap();
        assert_eq!(active, vec![alice.uid]);

        let later = db
            .list_tenants_updated_between(end, end + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_list_tenants() {
        let db = test_db().await;
        assert!(db.list_tenants().await.unwrap().is_empty());

        let alice = funded(&db, "alice", 1).await;
        let bob = funded(&db, "bob", 1).await;

        let mut all = db.list_tenants().await.unwrap();
        all.sort();
        let mut expected = vec![alice.uid, bob.uid];
        expected.sort();
        assert_eq!(all, expected);
    }
}
