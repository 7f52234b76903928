//! Suspend / resume / delete pipelines for one tenant namespace.
//!
//! `suspend` walks the configured stages in order and stops at the first
//! failing stage; stages already applied stay applied and the next attempt
//! re-runs them as no-ops. `resume` mirrors it. `delete` fires one
//! delete-all per kind concurrently and reports the first real failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::handlers::{
    HandlerContext, SuspendStage, Transform, cluster_needs_start, handlers_for,
};
use super::object_storage::{ObjectStorageAdmin, ObjectStorageError, UserStatus, storage_user};
use super::snapshot::PREVIOUS_SCHEDULER_ANNOTATION;
use crate::cluster::{
    ClusterApi, ClusterError, OpsType, Resource, ResourceKind, ResourceSpec, update_resource,
};
use crate::config::SuspensionConfig;
use crate::types::SuspendAction;

/// Name of the deny-all quota applied to suspended namespaces.
pub const QUOTA_NAME: &str = "debt-limit0";

/// Kinds removed by a final deletion.
pub const DELETE_KINDS: &[ResourceKind] = &[
    ResourceKind::Backup,
    ResourceKind::Cluster,
    ResourceKind::OpsRequest,
    ResourceKind::PersistentVolumeClaim,
    ResourceKind::Service,
    ResourceKind::Ingress,
    ResourceKind::Certificate,
    ResourceKind::Issuer,
    ResourceKind::HorizontalPodAutoscaler,
    ResourceKind::CronJob,
    ResourceKind::Job,
    ResourceKind::AppInstance,
    ResourceKind::Devbox,
    ResourceKind::Deployment,
    ResourceKind::StatefulSet,
    ResourceKind::ReplicaSet,
    ResourceKind::Pod,
];

pub fn deny_all_limits() -> BTreeMap<String, String> {
    ["limits.cpu", "limits.memory", "requests.storage"]
        .into_iter()
        .map(|k| (k.to_string(), "0".to_string()))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("cluster API: {0}")]
    Cluster(#[from] ClusterError),

    #[error("snapshot encoding: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("object storage: {0}")]
    ObjectStorage(#[from] ObjectStorageError),

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: SuspendStage,
        #[source]
        source: Box<EngineError>,
    },

    #[error("deleting {kind} failed: {source}")]
    Delete {
        kind: ResourceKind,
        #[source]
        source: ClusterError,
    },
}

impl EngineError {
    /// Stage that failed, if the error came from a pipeline stage.
    pub fn stage(&self) -> Option<SuspendStage> {
        match self {
            EngineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub stages: Vec<SuspendStage>,
    pub debt_scheduler: String,
    pub handler_context: HandlerContext,
    pub conflict_retries: u32,
}

impl EngineSettings {
    pub fn from_config(config: &SuspensionConfig) -> Self {
        Self {
            stages: config.stages.clone(),
            debt_scheduler: config.debt_scheduler.clone(),
            handler_context: HandlerContext {
                paused_ingress_class: config.paused_ingress_class.clone(),
                default_ingress_class: config.default_ingress_class.clone(),
            },
            conflict_retries: config.conflict_retries,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SuspensionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Suspend,
    Resume,
}

pub struct SuspensionEngine<C, O> {
    cluster: Arc<C>,
    object_storage: O,
    settings: EngineSettings,
}

impl<C: ClusterApi, O: ObjectStorageAdmin> SuspensionEngine<C, O> {
    pub fn new(cluster: Arc<C>, object_storage: O, settings: EngineSettings) -> Self {
        Self {
            cluster,
            object_storage,
            settings,
        }
    }

    pub async fn run(&self, action: SuspendAction, namespace: &str) -> Result<(), EngineError> {
        match action {
            SuspendAction::Suspend => self.suspend(namespace).await,
            SuspendAction::Resume => self.resume(namespace).await,
            SuspendAction::Delete => self.delete(namespace).await,
        }
    }

    pub async fn suspend(&self, namespace: &str) -> Result<(), EngineError> {
        self.suspend_at(namespace, Utc::now()).await
    }

    pub async fn resume(&self, namespace: &str) -> Result<(), EngineError> {
        self.resume_at(namespace, Utc::now()).await
    }

    /// Suspend with an explicit clock (ops request names embed the hour).
    pub async fn suspend_at(&self, namespace: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        info!(namespace, "suspending namespace");
        for &stage in &self.settings.stages {
            debug!(namespace, %stage, "suspend stage");
            self.suspend_stage(stage, namespace, now)
                .await
                .map_err(|e| {
                    error!(namespace, %stage, error = %e, "suspend stage failed");
                    EngineError::Stage {
                        stage,
                        source: Box::new(e),
                    }
                })?;
        }
        info!(namespace, "namespace suspended");
        Ok(())
    }

    pub async fn resume_at(&self, namespace: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        info!(namespace, "resuming namespace");
        for stage in SuspendStage::resume_order(&self.settings.stages) {
            debug!(namespace, %stage, "resume stage");
            self.resume_stage(stage, namespace, now)
                .await
                .map_err(|e| {
                    error!(namespace, %stage, error = %e, "resume stage failed");
                    EngineError::Stage {
                        stage,
                        source: Box::new(e),
                    }
                })?;
        }
        info!(namespace, "namespace resumed");
        Ok(())
    }

    /// Delete every tenant resource kind in parallel. Already-issued deletes
    /// are not rolled back when another kind fails.
    pub async fn delete(&self, namespace: &str) -> Result<(), EngineError> {
        info!(namespace, "deleting namespace resources");
        let results = join_all(DELETE_KINDS.iter().map(|&kind| async move {
            (kind, self.cluster.delete_all(kind, namespace).await)
        }))
        .await;

        let mut first_error = None;
        for (kind, result) in results {
            match result {
                Ok(0) => {}
                Ok(count) => debug!(namespace, %kind, count, "deleted resources"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(namespace, %kind, error = %e, "delete failed");
                    if first_error.is_none() {
                        first_error = Some(EngineError::Delete { kind, source: e });
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn suspend_stage(
        &self,
        stage: SuspendStage,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match stage {
            SuspendStage::StopClusters => {
                self.apply_handlers(stage, namespace, Direction::Suspend).await?;
                self.stop_clusters(namespace, now).await
            }
            SuspendStage::OrphanPods => self.suspend_orphan_pods(namespace).await,
            SuspendStage::OwnedPods => self.delete_owned_pods(namespace, false).await,
            SuspendStage::Workloads | SuspendStage::Jobs | SuspendStage::Certificates => {
                self.apply_handlers(stage, namespace, Direction::Suspend).await
            }
            SuspendStage::ObjectStorage => {
                self.set_storage_status(namespace, UserStatus::Disabled).await
            }
            SuspendStage::Quota => self.apply_quota(namespace).await,
        }
    }

    async fn resume_stage(
        &self,
        stage: SuspendStage,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match stage {
            SuspendStage::StopClusters => self.resume_clusters(namespace, now).await,
            SuspendStage::OrphanPods => self.resume_orphan_pods(namespace).await,
            SuspendStage::OwnedPods => self.delete_owned_pods(namespace, true).await,
            SuspendStage::Workloads | SuspendStage::Jobs | SuspendStage::Certificates => {
                self.apply_handlers(stage, namespace, Direction::Resume).await
            }
            SuspendStage::ObjectStorage => {
                self.set_storage_status(namespace, UserStatus::Enabled).await
            }
            SuspendStage::Quota => self.remove_quota(namespace).await,
        }
    }

    async fn apply_handlers(
        &self,
        stage: SuspendStage,
        namespace: &str,
        direction: Direction,
    ) -> Result<(), EngineError> {
        for handler in handlers_for(stage) {
            let transform: Transform = match direction {
                Direction::Suspend => handler.suspend,
                Direction::Resume => handler.resume,
            };
            let resources = self.cluster.list(handler.kind, namespace).await?;
            for resource in resources.iter().filter(|r| handler.applies_to(r)) {
                self.patch(resource, |r| transform(r, &self.settings.handler_context))
                    .await?;
            }
        }
        Ok(())
    }

    /// Re-read and rewrite one resource; a resource deleted meanwhile is skipped.
    async fn patch<F>(&self, resource: &Resource, mut transform: F) -> Result<(), EngineError>
    where
        F: FnMut(&mut Resource) -> Result<bool, serde_json::Error>,
    {
        let result = update_resource(
            &*self.cluster,
            resource.kind,
            resource.namespace(),
            resource.name(),
            self.settings.conflict_retries,
            |r| transform(r).map_err(EngineError::from),
        )
        .await;

        match result {
            Ok(Some(_)) => {
                debug!(resource = %resource.key(), "updated");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(EngineError::Cluster(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn stop_clusters(&self, namespace: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        for cluster in self.cluster.list(ResourceKind::Cluster, namespace).await? {
            let ResourceSpec::Cluster { phase, .. } = &cluster.spec else {
                continue;
            };
            if phase.is_stopped_or_stopping() {
                continue;
            }
            self.create_ops(&cluster, OpsType::Stop, now).await?;
        }
        Ok(())
    }

    async fn resume_clusters(&self, namespace: &str, now: DateTime<Utc>) -> Result<(), EngineError> {
        for handler in handlers_for(SuspendStage::StopClusters) {
            for cluster in self.cluster.list(handler.kind, namespace).await? {
                let mut start = false;
                self.patch(&cluster, |r| {
                    start = cluster_needs_start(r);
                    (handler.resume)(r, &self.settings.handler_context)
                })
                .await?;
                if start {
                    self.create_ops(&cluster, OpsType::Start, now).await?;
                }
            }
        }
        Ok(())
    }

    async fn create_ops(
        &self,
        cluster: &Resource,
        op_type: OpsType,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let name = format!(
            "{}-{}-{}",
            op_type.prefix(),
            cluster.name(),
            now.format("%Y-%m-%d-%H")
        );
        let ops = Resource::new(
            ResourceKind::OpsRequest,
            cluster.namespace(),
            name.as_str(),
            ResourceSpec::OpsRequest {
                cluster_ref: cluster.name().to_string(),
                op_type,
            },
        );

        match self.cluster.create(ops).await {
            Ok(_) => {
                info!(namespace = cluster.namespace(), ops = %name, "created ops request");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn on_debt_scheduler(&self, pod: &Resource) -> bool {
        matches!(
            &pod.spec,
            ResourceSpec::Pod { scheduler_name: Some(s), .. } if *s == self.settings.debt_scheduler
        )
    }

    /// Recreate unowned pods bound to the debt scheduler so nothing runs them.
    async fn suspend_orphan_pods(&self, namespace: &str) -> Result<(), EngineError> {
        for pod in self.cluster.list(ResourceKind::Pod, namespace).await? {
            if pod.metadata.is_owned() || self.on_debt_scheduler(&pod) {
                continue;
            }
            let ResourceSpec::Pod { scheduler_name, .. } = &pod.spec else {
                continue;
            };

            let mut clone = pod.clone();
            clone.metadata.resource_version = 0;
            clone.metadata.annotations.insert(
                PREVIOUS_SCHEDULER_ANNOTATION.to_string(),
                scheduler_name.clone().unwrap_or_default(),
            );
            clone.spec = ResourceSpec::Pod {
                scheduler_name: Some(self.settings.debt_scheduler.clone()),
                node_name: None,
            };
            self.recreate_pod(&pod, clone).await?;
        }
        Ok(())
    }

    /// Put orphan pods back on their previous scheduler.
    async fn resume_orphan_pods(&self, namespace: &str) -> Result<(), EngineError> {
        for pod in self.cluster.list(ResourceKind::Pod, namespace).await? {
            if pod.metadata.is_owned() || !self.on_debt_scheduler(&pod) {
                continue;
            }

            let mut clone = pod.clone();
            clone.metadata.resource_version = 0;
            let previous = clone
                .metadata
                .annotations
                .remove(PREVIOUS_SCHEDULER_ANNOTATION)
                .filter(|s| !s.is_empty());
            clone.spec = ResourceSpec::Pod {
                scheduler_name: previous,
                node_name: None,
            };
            self.recreate_pod(&pod, clone).await?;
        }
        Ok(())
    }

    /// Delete controller-managed pods. On suspend every owned pod goes; on
    /// resume only those still pinned to the debt scheduler.
    async fn delete_owned_pods(&self, namespace: &str, resuming: bool) -> Result<(), EngineError> {
        for pod in self.cluster.list(ResourceKind::Pod, namespace).await? {
            if !pod.metadata.is_owned() || self.on_debt_scheduler(&pod) != resuming {
                continue;
            }
            match self
                .cluster
                .delete(ResourceKind::Pod, namespace, pod.name())
                .await
            {
                Ok(()) => debug!(namespace, pod = pod.name(), "deleted owned pod"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn recreate_pod(&self, old: &Resource, new: Resource) -> Result<(), EngineError> {
        match self
            .cluster
            .delete(ResourceKind::Pod, old.namespace(), old.name())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.cluster.create(new).await?;
        debug!(namespace = old.namespace(), pod = old.name(), "recreated pod");
        Ok(())
    }

    async fn apply_quota(&self, namespace: &str) -> Result<(), EngineError> {
        let hard = deny_all_limits();
        let quota = Resource::new(
            ResourceKind::ResourceQuota,
            namespace,
            QUOTA_NAME,
            ResourceSpec::Quota { hard: hard.clone() },
        );

        match self.cluster.create(quota.clone()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                self.patch(&quota, |r| {
                    let desired = ResourceSpec::Quota { hard: hard.clone() };
                    if r.spec == desired {
                        return Ok(false);
                    }
                    r.spec = desired;
                    Ok(true)
                })
                .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_quota(&self, namespace: &str) -> Result<(), EngineError> {
        match self
            .cluster
            .delete(ResourceKind::ResourceQuota, namespace, QUOTA_NAME)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_storage_status(&self, namespace: &str, status: UserStatus) -> Result<(), EngineError> {
        let Some(user) = storage_user(namespace) else {
            warn!(namespace, "namespace has no owner segment, skipping object storage");
            return Ok(());
        };

        let users = self.object_storage.list_users().await?;
        if !users.contains(user) {
            debug!(namespace, user, "no object storage user, skipping");
            return Ok(());
        }

        self.object_storage.set_user_status(user, status).await?;
        info!(namespace, user, ?status, "object storage user updated");
        Ok(())
    }
}
