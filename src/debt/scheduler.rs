//! Periodic reconciliation loops.
//!
//! - activity: tenants whose account changed since the last scan
//! - aging: tenants parked in `Debt` / `DebtDeletion` past their period, plus
//!   tenants whose last transition never reached their namespaces
//! - retry: tenants that failed on an earlier pass
//! - expiry: pending transfer requests past their window
//!
//! Each loop stops scheduling new passes once the cancel channel fires; a
//! pass already running finishes first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::coordinator::{Coordinator, PassReport};
use super::reconciler::Reconciler;
use super::tier::DebtThresholds;
use crate::cluster::ClusterApi;
use crate::config::{Config, ReconcileConfig};
use crate::ledger::{LedgerDb, LedgerError};
use crate::types::{DebtTier, TenantId};

/// `now - period`, saturating at the earliest representable time.
fn before(now: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(period)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Tracks which slice of ledger activity the next scan covers.
#[derive(Debug, Clone)]
pub struct ActivityWindow {
    last_end: Option<DateTime<Utc>>,
    lookback: Duration,
    lag: Duration,
    interval: Duration,
}

impl ActivityWindow {
    pub fn new(lookback: Duration, lag: Duration, interval: Duration) -> Self {
        Self {
            last_end: None,
            lookback,
            lag,
            interval,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(
            Duration::from_secs(config.initial_lookback_secs),
            Duration::from_secs(config.activity_lag_secs),
            Duration::from_secs(config.activity_interval_secs),
        )
    }

    /// Next `[start, end)` range, or `None` if it would be empty.
    pub fn next(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (start, end) = match self.last_end {
            None => (before(now, self.lookback), before(now, self.lag)),
            Some(last) => (last, before(now, self.interval)),
        };
        (start < end).then_some((start, end))
    }

    pub fn advance(&mut self, end: DateTime<Utc>) {
        self.last_end = Some(end);
    }
}

pub struct Scheduler<C> {
    ledger: LedgerDb,
    reconciler: Arc<Reconciler<C>>,
    coordinator: Arc<Coordinator>,
    window: Mutex<ActivityWindow>,
    reconcile: ReconcileConfig,
    thresholds: DebtThresholds,
    transfer_expiry: Duration,
}

impl<C: ClusterApi> Scheduler<C> {
    pub fn new(
        ledger: LedgerDb,
        reconciler: Arc<Reconciler<C>>,
        coordinator: Arc<Coordinator>,
        config: &Config,
    ) -> Self {
        Self {
            ledger,
            reconciler,
            coordinator,
            window: Mutex::new(ActivityWindow::from_config(&config.reconcile)),
            reconcile: config.reconcile.clone(),
            thresholds: config.debt.thresholds(),
            transfer_expiry: config.ledger.transfer_expiry(),
        }
    }

    /// Whether this instance's shard handles `uid`.
    pub fn owns(&self, uid: TenantId) -> bool {
        let count = self.reconcile.shard_count.max(1) as u128;
        uid.as_u128() % count == self.reconcile.shard_index as u128
    }

    async fn reconcile(&self, tenants: Vec<TenantId>) -> PassReport {
        let owned: Vec<TenantId> = tenants.into_iter().filter(|uid| self.owns(*uid)).collect();
        self.coordinator
            .run_pass(owned, |uid| self.reconciler.refresh(uid))
            .await
    }

    /// Reconcile tenants with ledger activity in the next window. A failed
    /// query leaves the window where it was.
    pub async fn activity_pass(&self, now: DateTime<Utc>) -> Result<PassReport, LedgerError> {
        let tenants = {
            let mut window = self.window.lock().await;
            let Some((start, end)) = window.next(now) else {
                return Ok(PassReport::default());
            };
            let tenants = self.ledger.list_tenants_updated_between(start, end).await?;
            window.advance(end);
            debug!(%start, %end, count = tenants.len(), "activity window scanned");
            tenants
        };
        Ok(self.reconcile(tenants).await)
    }

    /// Reconcile tenants that have sat in a debt tier long enough to age, and
    /// re-send every signal still marked pending.
    pub async fn aging_pass(&self, now: DateTime<Utc>) -> Result<PassReport, LedgerError> {
        let status = self.reconciler.status();
        let mut tenants = status
            .list_in_tier_since(DebtTier::Debt, before(now, self.thresholds.debt_deletion_period))
            .await?;
        tenants.extend(
            status
                .list_in_tier_since(
                    DebtTier::DebtDeletion,
                    before(now, self.thresholds.final_deletion_period),
                )
                .await?,
        );

        let pending = status.list_signal_pending().await?;
        if !pending.is_empty() {
            debug!(count = pending.len(), "undelivered debt signals");
        }
        tenants.extend(pending);

        Ok(self.reconcile(tenants).await)
    }

    pub async fn retry_pass(&self) -> PassReport {
        self.coordinator
            .retry_failed(|uid| self.reconciler.refresh(uid))
            .await
    }

    pub async fn expiry_pass(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        self.ledger
            .expire_transfers(before(now, self.transfer_expiry))
            .await
    }

    /// Run every loop until `cancel` fires.
    pub async fn run(&self, cancel: watch::Receiver<bool>) {
        let secs = Duration::from_secs;
        info!(
            shard = self.reconcile.shard_index,
            shards = self.reconcile.shard_count,
            "starting reconcile loops"
        );

        tokio::join!(
            every(
                "activity",
                secs(self.reconcile.activity_interval_secs),
                cancel.clone(),
                move || async move {
                    match self.activity_pass(Utc::now()).await {
                        Ok(report) => log_report("activity", report),
                        Err(e) => error!(error = %e, "activity scan failed"),
                    }
                },
            ),
            every(
                "aging",
                secs(self.reconcile.aging_interval_secs),
                cancel.clone(),
                move || async move {
                    match self.aging_pass(Utc::now()).await {
                        Ok(report) => log_report("aging", report),
                        Err(e) => error!(error = %e, "aging scan failed"),
                    }
                },
            ),
            every(
                "retry",
                secs(self.reconcile.retry_interval_secs),
                cancel.clone(),
                move || async move { log_report("retry", self.retry_pass().await) },
            ),
            every(
                "transfer-expiry",
                secs(self.reconcile.expiry_interval_secs),
                cancel,
                move || async move {
                    match self.expiry_pass(Utc::now()).await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "expired pending transfers"),
                        Err(e) => error!(error = %e, "transfer expiry failed"),
                    }
                },
            ),
        );
    }
}

fn log_report(pass: &'static str, report: PassReport) {
    if report == PassReport::default() {
        return;
    }
    info!(
        pass,
        processed = report.processed,
        succeeded = report.succeeded,
        failed = report.failed,
        abandoned = report.abandoned,
        skipped = report.skipped,
        "reconcile pass done"
    );
}

/// Call `tick` every `period` until `cancel` changes or its sender drops.
pub async fn every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => tick().await,
            _ = cancel.changed() => {
                debug!(task = name, "loop stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemoryCluster, Namespace};
    use crate::ledger::{LedgerCipher, TransferPolicy};
    use crate::types::{AccountKey, BASE_UNIT, DEBT_STATUS_KEY, TransferStatus};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Fixture {
        ledger: LedgerDb,
        cluster: Arc<MemoryCluster>,
        scheduler: Scheduler<MemoryCluster>,
    }

    async fn fixture(config: Config) -> Fixture {
        let cipher = LedgerCipher::new(&SecretString::from("test-key".to_string()));
        let ledger = LedgerDb::open_in_memory(cipher, TransferPolicy::default())
            .await
            .unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        cluster
            .create_namespace(Namespace::for_owner("ns-alice", "alice"))
            .await
            .unwrap();
        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            cluster.clone(),
            config.debt.thresholds(),
            3,
        ));
        let coordinator = Arc::new(Coordinator::from_config(&config.reconcile));
        let scheduler = Scheduler::new(ledger.clone(), reconciler, coordinator, &config);
        Fixture {
            ledger,
            cluster,
            scheduler,
        }
    }

    async fn indebted(ledger: &LedgerDb, owner: &str) -> TenantId {
        let uid = Uuid::new_v4();
        ledger.create_account(uid, owner).await.unwrap();
        ledger
            .add_deduction_balance(&AccountKey::Uid(uid), BASE_UNIT)
            .await
            .unwrap();
        uid
    }

    #[test]
    fn test_activity_window() {
        let hour = Duration::from_secs(3600);
        let mut window = ActivityWindow::new(24 * hour, Duration::from_secs(120), Duration::from_secs(60));
        let now = Utc::now();

        let (start, end) = window.next(now).unwrap();
        assert_eq!(start, now - chrono::Duration::hours(24));
        assert_eq!(end, now - chrono::Duration::minutes(2));

        window.advance(end);
        let later = now + chrono::Duration::minutes(5);
        let (start2, end2) = window.next(later).unwrap();
        assert_eq!(start2, end);
        assert_eq!(end2, later - chrono::Duration::minutes(1));

        // Nothing new yet.
        window.advance(end2);
        assert_eq!(window.next(later), None);
    }

    #[tokio::test]
    async fn test_shard_filter() {
        let mut config = Config::default();
        config.reconcile.shard_count = 2;
        config.reconcile.shard_index = 1;
        let f = fixture(config).await;

        assert!(f.scheduler.owns(Uuid::from_u128(3)));
        assert!(!f.scheduler.owns(Uuid::from_u128(4)));
    }

    #[tokio::test]
    async fn test_activity_pass_reconciles_recent_tenants() {
        let mut config = Config::default();
        config.reconcile.activity_lag_secs = 0;
        let f = fixture(config).await;
        let uid = indebted(&f.ledger, "alice").await;

        let now = Utc::now() + chrono::Duration::seconds(1);
        let report = f.scheduler.activity_pass(now).await.unwrap();
        assert_eq!(report.succeeded, 1);

        let status = f.scheduler.reconciler.status().get(uid).await.unwrap().unwrap();
        assert_eq!(status.tier, DebtTier::Debt);

        // The window moved on: the same activity is not scanned twice.
        let report = f
            .scheduler
            .activity_pass(now + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn test_aging_pass_advances_stale_debt() {
        let f = fixture(Config::default()).await;
        let uid = indebted(&f.ledger, "alice").await;

        let eight_days_ago = Utc::now() - chrono::Duration::days(8);
        f.scheduler
            .reconciler
            .refresh_at(uid, eight_days_ago)
            .await
            .unwrap();

        let report = f.scheduler.aging_pass(Utc::now()).await.unwrap();
        assert_eq!(report.succeeded, 1);
        let status = f.scheduler.reconciler.status().get(uid).await.unwrap().unwrap();
        assert_eq!(status.tier, DebtTier::DebtDeletion);

        // Freshly moved: not stale yet.
        let report = f.scheduler.aging_pass(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_aging_pass_resends_pending_signal() {
        let f = fixture(Config::default()).await;
        let uid = indebted(&f.ledger, "alice").await;

        f.cluster.fail_namespaces(true);
        assert!(f.scheduler.reconciler.refresh(uid).await.is_err());
        f.cluster.fail_namespaces(false);

        // The activity window ends before the failed refresh and the tenant
        // is nowhere near its deletion period.
        let report = f.scheduler.activity_pass(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);

        let report = f.scheduler.aging_pass(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, 1);

        let ns = f.cluster.get_namespace("ns-alice").await.unwrap();
        assert_eq!(ns.annotation(DEBT_STATUS_KEY), Some("Suspend"));
        assert!(f.scheduler.reconciler.status().list_signal_pending().await.unwrap().is_empty());

        // Delivered: the next pass has nothing to do.
        let report = f.scheduler.aging_pass(Utc::now()).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_expiry_pass() {
        let f = fixture(Config::default()).await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        f.ledger.create_account(a, "alice").await.unwrap();
        f.ledger.create_account(b, "bob").await.unwrap();
        let request = f
            .ledger
            .create_transfer(&AccountKey::Uid(a), &AccountKey::Uid(b), BASE_UNIT)
            .await
            .unwrap();

        assert_eq!(f.scheduler.expiry_pass(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(f.scheduler.expiry_pass(later).await.unwrap(), 1);
        assert_eq!(
            f.ledger.get_transfer(request.id).await.unwrap().status,
            TransferStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_every_stops_on_cancel() {
        let (tx, rx) = watch::channel(false);
        let ticks = AtomicUsize::new(0);
        let counter = &ticks;

        let looping = every("test", Duration::from_millis(5), rx, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(looping, stopper);

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
