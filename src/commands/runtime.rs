//! Wiring shared by the commands that drive the cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::GlobalArgs;
use crate::cluster::{MemoryCluster, Timed};
use crate::config::Config;
use crate::controller::{ControllerSettings, NamespaceController};
use crate::debt::{Coordinator, Reconciler, Scheduler};
use crate::ledger::LedgerDb;
use crate::suspend::{EngineSettings, ObjectStorageClients, SuspensionEngine};

/// Cluster backed by a YAML state file.
pub type LocalCluster = Timed<MemoryCluster>;

pub struct ControlPlane {
    pub config: Config,
    pub ledger: LedgerDb,
    pub cluster: Arc<LocalCluster>,
    pub reconciler: Arc<Reconciler<LocalCluster>>,
    pub coordinator: Arc<Coordinator>,
    pub scheduler: Scheduler<LocalCluster>,
    pub controller: NamespaceController<LocalCluster, ObjectStorageClients>,
    state_path: PathBuf,
}

impl ControlPlane {
    pub async fn open(global: &GlobalArgs, state_path: &Path) -> Result<Self> {
        let config = global.load_config()?;
        let ledger = global.open_ledger(&config).await?;

        let cluster = MemoryCluster::load(state_path).with_context(|| {
            format!("Failed to load cluster state from {}", state_path.display())
        })?;
        let cluster = Arc::new(Timed::new(cluster, config.reconcile.api_timeout()));

        let reconciler = Arc::new(Reconciler::new(
            ledger.clone(),
            cluster.clone(),
            config.debt.thresholds(),
            config.suspension.conflict_retries,
        ));
        let coordinator = Arc::new(Coordinator::from_config(&config.reconcile));
        let scheduler = Scheduler::new(
            ledger.clone(),
            reconciler.clone(),
            coordinator.clone(),
            &config,
        );

        let object_storage = ObjectStorageClients::from_config(&config.object_storage)
            .context("Invalid object_storage config")?;
        if !object_storage.is_enabled() {
            info!("object storage admin not configured, storage stages are no-ops");
        }
        let engine = SuspensionEngine::new(
            cluster.clone(),
            object_storage,
            EngineSettings::from_config(&config.suspension),
        );
        let controller = NamespaceController::new(
            cluster.clone(),
            engine,
            ControllerSettings::from_config(&config),
        );

        Ok(Self {
            config,
            ledger,
            cluster,
            reconciler,
            coordinator,
            scheduler,
            controller,
            state_path: state_path.to_path_buf(),
        })
    }

    /// Write the cluster state back to its file.
    pub async fn save(&self) -> Result<()> {
        self.cluster
            .inner()
            .save(&self.state_path)
            .await
            .with_context(|| format!("Failed to save cluster state to {}", self.state_path.display()))
    }

    pub async fn close(&self) -> Result<()> {
        let saved = self.save().await;
        self.ledger.close().await;
        saved
    }
}
