//! Per-tenant locking, failure tracking and the bounded worker pool.
//!
//! A pass fans tenants out over at most `pool_size` concurrent workers. Each
//! worker takes the tenant's lock without waiting: a tenant already being
//! processed elsewhere is skipped for this pass. Failures are counted per
//! tenant and retried by [`Coordinator::retry_failed`] until they succeed or
//! hit `max_attempts`.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::ReconcileConfig;
use crate::types::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Abandoned,
    Skipped,
}

/// Counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tenants dropped from the retry set after `max_attempts` failures.
    pub abandoned: usize,
    /// Tenants whose lock was held by another worker.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct Coordinator {
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
    failed: DashMap<TenantId, u32>,
    pool_size: usize,
    max_attempts: u32,
}

impl Coordinator {
    pub fn new(pool_size: usize, max_attempts: u32) -> Self {
        Self {
            locks: DashMap::new(),
            failed: DashMap::new(),
            pool_size: pool_size.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.pool_size, config.max_attempts)
    }

    /// Tenants waiting for a retry.
    pub fn failed_tenants(&self) -> Vec<TenantId> {
        self.failed.iter().map(|entry| *entry.key()).collect()
    }

    /// Attempts recorded for a failing tenant.
    #[cfg(test)]
    pub fn attempts(&self, uid: TenantId) -> u32 {
        self.failed.get(&uid).map(|a| *a).unwrap_or(0)
    }

    /// Run `work` for every distinct tenant under its lock.
    pub async fn run_pass<I, F, Fut, T, E>(&self, tenants: I, work: F) -> PassReport
    where
        I: IntoIterator<Item = TenantId>,
        F: Fn(TenantId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut seen = HashSet::new();
        let tenants: Vec<TenantId> = tenants.into_iter().filter(|uid| seen.insert(*uid)).collect();
        if tenants.is_empty() {
            return PassReport::default();
        }

        let work = &work;
        let outcomes: Vec<Outcome> = stream::iter(tenants)
            .map(|uid| async move { self.process(uid, work).await })
            .buffer_unordered(self.pool_size)
            .collect()
            .await;

        let mut report = PassReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Skipped => report.skipped += 1,
                Outcome::Succeeded => report.succeeded += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Abandoned => report.abandoned += 1,
            }
            if outcome != Outcome::Skipped {
                report.processed += 1;
            }
        }
        report
    }

    /// Re-run `work` for every tenant in the retry set.
    pub async fn retry_failed<F, Fut, T, E>(&self, work: F) -> PassReport
    where
        F: Fn(TenantId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let tenants = self.failed_tenants();
        if !tenants.is_empty() {
            debug!(count = tenants.len(), "retrying failed tenants");
        }
        self.run_pass(tenants, work).await
    }

    async fn process<F, Fut, T, E>(&self, uid: TenantId, work: &F) -> Outcome
    where
        F: Fn(TenantId) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let lock = self.locks.entry(uid).or_default().clone();
        let guard = lock.try_lock_owned();

        let result = match guard {
            Ok(guard) => {
                let result = work(uid).await;
                drop(guard);
                Some(result)
            }
            Err(_) => None,
        };
        // Last holder out removes the entry.
        self.locks.remove_if(&uid, |_, l| Arc::strong_count(l) == 1);

        match result {
            None => {
                debug!(tenant = %uid, "tenant busy, skipping");
                Outcome::Skipped
            }
            Some(Ok(_)) => {
                self.failed.remove(&uid);
                Outcome::Succeeded
            }
            Some(Err(e)) => self.record_failure(uid, e),
        }
    }

    fn record_failure(&self, uid: TenantId, error: impl Display) -> Outcome {
        let attempts = {
            let mut entry = self.failed.entry(uid).or_insert(0);
            *entry += 1;
            *entry
        };

        if attempts >= self.max_attempts {
            self.failed.remove(&uid);
            error!(tenant = %uid, attempts, error = %error, "giving up on tenant");
            Outcome::Abandoned
        } else {
            warn!(tenant = %uid, attempts, error = %error, "tenant reconcile failed");
            Outcome::Failed
        }
    }
}
