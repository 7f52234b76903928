//! Namespace controller.
//!
//! Evaluates the rule table for a namespace, runs the chosen engine action
//! and only then marks the annotations completed. A failed action leaves
//! the annotations untouched and requeues the namespace after a backoff.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::rules::{self, Plan};
use crate::cluster::{ClusterApi, ClusterError, Namespace, update_namespace};
use crate::config::Config;
use crate::debt::every;
use crate::suspend::{ObjectStorageAdmin, SuspensionEngine};
use crate::types::{DebtSignal, NetworkSignal, Signal, SignalKind, SuspendAction};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub delete_backoff: Duration,
    pub action_backoff: Duration,
    pub poll_interval: Duration,
    pub conflict_retries: u32,
    pub concurrency: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.suspension;
        Self {
            delete_backoff: Duration::from_secs(s.delete_backoff_secs),
            action_backoff: Duration::from_secs(s.action_backoff_secs),
            poll_interval: Duration::from_secs(s.poll_interval_secs),
            conflict_retries: s.conflict_retries,
            concurrency: config.reconcile.pool_size.max(1),
        }
    }

    fn backoff(&self, action: SuspendAction) -> Duration {
        match action {
            SuspendAction::Delete => self.delete_backoff,
            SuspendAction::Suspend | SuspendAction::Resume => self.action_backoff,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of reconciling one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing requested.
    Idle,
    /// Action (if any) succeeded and annotations were completed.
    Applied(Plan),
    /// Action failed; try again after the delay.
    Requeue(Duration),
}

/// Totals for one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub applied: usize,
    pub requeued: usize,
    /// Namespaces still waiting out a requeue delay.
    pub deferred: usize,
}

fn has_request(ns: &Namespace) -> bool {
    rules::has_request(
        rules::read::<DebtSignal>(&ns.annotations),
        rules::read::<NetworkSignal>(&ns.annotations),
    )
}

/// Replace a requested value with its completed counterpart. Leaves the
/// annotation alone if someone wrote a different value meanwhile.
fn complete<K: SignalKind>(ns: &mut Namespace, target: Option<Signal<K>>) -> bool {
    let Some(target) = target else {
        return false;
    };
    let requested = Signal::Requested(target.kind()).value();
    if ns.annotation(K::KEY) != Some(requested.as_str()) {
        return false;
    }
    ns.annotations.insert(K::KEY.to_string(), target.value());
    true
}

pub struct NamespaceController<C, O> {
    cluster: Arc<C>,
    engine: SuspensionEngine<C, O>,
    settings: ControllerSettings,
    requeue: DashMap<String, Instant>,
}

impl<C: ClusterApi, O: ObjectStorageAdmin> NamespaceController<C, O> {
    pub fn new(cluster: Arc<C>, engine: SuspensionEngine<C, O>, settings: ControllerSettings) -> Self {
        Self {
            cluster,
            engine,
            settings,
            requeue: DashMap::new(),
        }
    }

    pub async fn reconcile(&self, name: &str) -> Result<Outcome, ClusterError> {
        let ns = self.cluster.get_namespace(name).await?;
        let plan = rules::plan(
            rules::read::<DebtSignal>(&ns.annotations),
            rules::read::<NetworkSignal>(&ns.annotations),
        );
        if plan.is_noop() {
            return Ok(Outcome::Idle);
        }

        if let Some(action) = plan.action {
            info!(namespace = name, %action, "running namespace action");
            if let Err(e) = self.engine.run(action, name).await {
                let after = self.settings.backoff(action);
                error!(namespace = name, %action, error = %e, retry_in = ?after, "namespace action failed");
                return Ok(Outcome::Requeue(after));
            }
        }

        let updated = update_namespace(&*self.cluster, name, self.settings.conflict_retries, |ns| {
            let debt = complete(ns, plan.debt);
            let network = complete(ns, plan.network);
            debt || network
        })
        .await?;

        if let Some(ns) = updated {
            info!(
                namespace = name,
                debt = ns.annotation(DebtSignal::KEY).unwrap_or_default(),
                network = ns.annotation(NetworkSignal::KEY).unwrap_or_default(),
                "namespace annotations completed"
            );
        }
        Ok(Outcome::Applied(plan))
    }

    /// Reconcile every namespace carrying a request whose requeue delay has passed.
    pub async fn poll_once(&self) -> Result<PollReport, ClusterError> {
        let now = Instant::now();
        let mut report = PollReport::default();

        let mut due = Vec::new();
        for ns in self.cluster.list_namespaces().await? {
            if !has_request(&ns) {
                self.requeue.remove(&ns.name);
                continue;
            }
            if self.requeue.get(&ns.name).is_some_and(|at| *at > now) {
                report.deferred += 1;
                continue;
            }
            due.push(ns.name);
        }

        let outcomes: Vec<(String, Result<Outcome, ClusterError>)> = stream::iter(due)
            .map(|name| async move {
                let outcome = self.reconcile(&name).await;
                (name, outcome)
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Requeue(after)) => {
                    self.requeue.insert(name, Instant::now() + after);
                    report.requeued += 1;
                }
                Ok(Outcome::Applied(plan)) => {
                    debug!(namespace = %name, action = ?plan.action, "namespace reconciled");
                    self.requeue.remove(&name);
                    report.applied += 1;
                }
                Ok(Outcome::Idle) => {
                    self.requeue.remove(&name);
                }
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %name, "namespace gone");
                    self.requeue.remove(&name);
                }
                Err(e) => {
                    error!(namespace = %name, error = %e, "namespace reconcile failed");
                    self.requeue
                        .insert(name, Instant::now() + self.settings.action_backoff);
                    report.requeued += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: watch::Receiver<bool>) {
        info!(interval = ?self.settings.poll_interval, "starting namespace controller");
        every("namespace-controller", self.settings.poll_interval, cancel, move || async move {
            match self.poll_once().await {
                Ok(report) if report.applied + report.requeued > 0 => info!(
                    applied = report.applied,
                    requeued = report.requeued,
                    deferred = report.deferred,
                    "namespace poll done"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "listing namespaces failed"),
            }
        })
        .await;
    }
}
