//! Per-kind suspend/resume transforms.
//!
//! Each entry of [`HANDLERS`] pairs a resource kind with two pure functions
//! that rewrite the resource in place and report whether anything changed.
//! The engine fetches, applies and writes back; handlers never talk to the
//! cluster.

use serde::{Deserialize, Serialize};

use super::snapshot::{
    self, CertificateSnapshot, ClusterSnapshot, IngressSnapshot, SuspendFlagSnapshot,
    WorkloadSnapshot,
};
use crate::cluster::{Resource, ResourceKind, ResourceSpec};

/// Replicas restored when a workload has no snapshot.
pub const DEFAULT_REPLICAS: i32 = 1;

/// Ordered steps of the suspend pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendStage {
    /// Stop managed database clusters and disable their backups.
    StopClusters,
    /// Move unowned pods onto the debt scheduler.
    OrphanPods,
    /// Delete controller-managed pods.
    OwnedPods,
    /// Scale orphan Deployments/StatefulSets/ReplicaSets to zero.
    Workloads,
    /// Suspend CronJobs and Jobs.
    Jobs,
    /// Stop certificate reissue and pause ingresses.
    Certificates,
    ObjectStorage,
    /// Deny-all resource quota.
    Quota,
}

impl SuspendStage {
    pub const DEFAULT_ORDER: [SuspendStage; 8] = [
        SuspendStage::StopClusters,
        SuspendStage::OrphanPods,
        SuspendStage::OwnedPods,
        SuspendStage::Workloads,
        SuspendStage::Jobs,
        SuspendStage::Certificates,
        SuspendStage::ObjectStorage,
        SuspendStage::Quota,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuspendStage::StopClusters => "stop_clusters",
            SuspendStage::OrphanPods => "orphan_pods",
            SuspendStage::OwnedPods => "owned_pods",
            SuspendStage::Workloads => "workloads",
            SuspendStage::Jobs => "jobs",
            SuspendStage::Certificates => "certificates",
            SuspendStage::ObjectStorage => "object_storage",
            SuspendStage::Quota => "quota",
        }
    }

    /// Resume order for a configured suspend pipeline: lift the quota first,
    /// restore everything else in pipeline order, re-enable storage last.
    pub fn resume_order(stages: &[SuspendStage]) -> Vec<SuspendStage> {
        let mut order = Vec::with_capacity(stages.len());
        if stages.contains(&SuspendStage::Quota) {
            order.push(SuspendStage::Quota);
        }
        order.extend(
            stages
                .iter()
                .copied()
                .filter(|s| !matches!(s, SuspendStage::Quota | SuspendStage::ObjectStorage)),
        );
        if stages.contains(&SuspendStage::ObjectStorage) {
            order.push(SuspendStage::ObjectStorage);
        }
        order
    }
}

impl std::fmt::Display for SuspendStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings handlers read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerContext {
    pub paused_ingress_class: String,
    pub default_ingress_class: String,
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self {
            paused_ingress_class: "pause".to_string(),
            default_ingress_class: "nginx".to_string(),
        }
    }
}

pub type Transform = fn(&mut Resource, &HandlerContext) -> Result<bool, serde_json::Error>;

pub struct KindHandler {
    pub kind: ResourceKind,
    pub stage: SuspendStage,
    /// Skip resources with owner references (their controller is handled instead).
    pub orphans_only: bool,
    pub suspend: Transform,
    pub resume: Transform,
}

impl KindHandler {
    pub fn applies_to(&self, resource: &Resource) -> bool {
        resource.kind == self.kind && !(self.orphans_only && resource.metadata.is_owned())
    }
}

pub static HANDLERS: &[KindHandler] = &[
    KindHandler {
        kind: ResourceKind::Cluster,
        stage: SuspendStage::StopClusters,
        orphans_only: false,
        suspend: suspend_cluster,
        resume: resume_cluster,
    },
    KindHandler {
        kind: ResourceKind::Deployment,
        stage: SuspendStage::Workloads,
        orphans_only: true,
        suspend: suspend_workload,
        resume: resume_workload,
    },
    KindHandler {
        kind: ResourceKind::StatefulSet,
        stage: SuspendStage::Workloads,
        orphans_only: true,
        suspend: suspend_workload,
        resume: resume_workload,
    },
    KindHandler {
        kind: ResourceKind::ReplicaSet,
        stage: SuspendStage::Workloads,
        orphans_only: true,
        suspend: suspend_workload,
        resume: resume_workload,
    },
    KindHandler {
        kind: ResourceKind::CronJob,
        stage: SuspendStage::Jobs,
        orphans_only: true,
        suspend: suspend_flag,
        resume: resume_flag,
    },
    KindHandler {
        kind: ResourceKind::Job,
        stage: SuspendStage::Jobs,
        orphans_only: true,
        suspend: suspend_flag,
        resume: resume_flag,
    },
    KindHandler {
        kind: ResourceKind::Certificate,
        stage: SuspendStage::Certificates,
        orphans_only: false,
        suspend: suspend_certificate,
        resume: resume_certificate,
    },
    KindHandler {
        kind: ResourceKind::Ingress,
        stage: SuspendStage::Certificates,
        orphans_only: false,
        suspend: suspend_ingress,
        resume: resume_ingress,
    },
];

/// Handlers run by `stage`, in table order.
pub fn handlers_for(stage: SuspendStage) -> impl Iterator<Item = &'static KindHandler> {
    HANDLERS.iter().filter(move |h| h.stage == stage)
}

fn suspend_workload(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let ResourceSpec::Workload { replicas } = &mut r.spec else {
        return Ok(false);
    };
    let wrote = snapshot::store(
        &mut r.metadata,
        &WorkloadSnapshot {
            replicas: *replicas,
        },
    )?;
    let scaled = *replicas != 0;
    *replicas = 0;
    Ok(wrote || scaled)
}

fn resume_workload(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let had_snapshot = snapshot::is_suspended(&r.metadata);
    let saved: Option<WorkloadSnapshot> = snapshot::take(&mut r.metadata);
    let ResourceSpec::Workload { replicas } = &mut r.spec else {
        return Ok(had_snapshot);
    };
    let target = match saved {
        Some(s) => s.replicas,
        None if *replicas == 0 => DEFAULT_REPLICAS,
        None => *replicas,
    };
    let changed = *replicas != target;
    *replicas = target;
    Ok(had_snapshot || changed)
}

fn suspend_flag(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let ResourceSpec::Suspendable { suspend } = &mut r.spec else {
        return Ok(false);
    };
    let wrote = snapshot::store(&mut r.metadata, &SuspendFlagSnapshot { suspend: *suspend })?;
    let flipped = !*suspend;
    *suspend = true;
    Ok(wrote || flipped)
}

fn resume_flag(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let had_snapshot = snapshot::is_suspended(&r.metadata);
    let saved: Option<SuspendFlagSnapshot> = snapshot::take(&mut r.metadata);
    let ResourceSpec::Suspendable { suspend } = &mut r.spec else {
        return Ok(had_snapshot);
    };
    let target = saved.map(|s| s.suspend).unwrap_or(false);
    let changed = *suspend != target;
    *suspend = target;
    Ok(had_snapshot || changed)
}

fn suspend_cluster(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let ResourceSpec::Cluster {
        phase,
        backup_enabled,
    } = &mut r.spec
    else {
        return Ok(false);
    };
    let wrote = snapshot::store(
        &mut r.metadata,
        &ClusterSnapshot {
            was_running: !phase.is_stopped_or_stopping(),
            backup_enabled: *backup_enabled,
        },
    )?;
    let disabled = *backup_enabled;
    *backup_enabled = false;
    Ok(wrote || disabled)
}

fn resume_cluster(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let had_snapshot = snapshot::is_suspended(&r.metadata);
    let saved: Option<ClusterSnapshot> = snapshot::take(&mut r.metadata);
    let ResourceSpec::Cluster { backup_enabled, .. } = &mut r.spec else {
        return Ok(had_snapshot);
    };
    let target = saved.map(|s| s.backup_enabled).unwrap_or(*backup_enabled);
    let changed = *backup_enabled != target;
    *backup_enabled = target;
    Ok(had_snapshot || changed)
}

/// Whether resuming `r` must start the cluster. Reads the snapshot, so call
/// before [`resume_cluster`] consumes it.
pub fn cluster_needs_start(r: &Resource) -> bool {
    let ResourceSpec::Cluster { phase, .. } = &r.spec else {
        return false;
    };
    match snapshot::peek::<ClusterSnapshot>(&r.metadata) {
        Some(saved) => saved.was_running && phase.is_stopped_or_stopping(),
        None => phase.is_stopped_or_stopping(),
    }
}

fn suspend_certificate(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let ResourceSpec::Certificate { reissue } = &mut r.spec else {
        return Ok(false);
    };
    let wrote = snapshot::store(&mut r.metadata, &CertificateSnapshot { reissue: *reissue })?;
    let flipped = *reissue;
    *reissue = false;
    Ok(wrote || flipped)
}

fn resume_certificate(r: &mut Resource, _: &HandlerContext) -> Result<bool, serde_json::Error> {
    let had_snapshot = snapshot::is_suspended(&r.metadata);
    let saved: Option<CertificateSnapshot> = snapshot::take(&mut r.metadata);
    let ResourceSpec::Certificate { reissue } = &mut r.spec else {
        return Ok(had_snapshot);
    };
    let target = saved.map(|s| s.reissue).unwrap_or(true);
    let changed = *reissue != target;
    *reissue = target;
    Ok(had_snapshot || changed)
}

fn suspend_ingress(r: &mut Resource, ctx: &HandlerContext) -> Result<bool, serde_json::Error> {
    let ResourceSpec::Ingress { class } = &mut r.spec else {
        return Ok(false);
    };
    let wrote = snapshot::store(
        &mut r.metadata,
        &IngressSnapshot {
            class: class.clone(),
        },
    )?;
    let paused = Some(ctx.paused_ingress_class.clone());
    let changed = *class != paused;
    *class = paused;
    Ok(wrote || changed)
}

fn resume_ingress(r: &mut Resource, ctx: &HandlerContext) -> Result<bool, serde_json::Error> {
    let had_snapshot = snapshot::is_suspended(&r.metadata);
    let saved: Option<IngressSnapshot> = snapshot::take(&mut r.metadata);
    let ResourceSpec::Ingress { class } = &mut r.spec else {
        return Ok(had_snapshot);
    };
    let target = match saved {
        Some(s) => s.class,
        None if class.as_deref() == Some(ctx.paused_ingress_class.as_str()) => {
            Some(ctx.default_ingress_class.clone())
        }
        None => class.clone(),
    };
    let changed = *class != target;
    *class = target;
    Ok(had_snapshot || changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterPhase, OwnerReference};
    use crate::suspend::snapshot::SNAPSHOT_ANNOTATION;

    fn ctx() -> HandlerContext {
        HandlerContext::default()
    }

    fn handler(kind: ResourceKind) -> &'static KindHandler {
        HANDLERS.iter().find(|h| h.kind == kind).unwrap()
    }

    #[test]
    fn test_every_handler_has_a_stage_in_default_order() {
        for h in HANDLERS {
            assert!(SuspendStage::DEFAULT_ORDER.contains(&h.stage), "{}", h.kind);
        }
    }

    #[test]
    fn test_workload_round_trip() {
        let h = handler(ResourceKind::Deployment);
        let mut r = Resource::new(
            ResourceKind::Deployment,
            "ns",
            "web",
            ResourceSpec::Workload { replicas: 3 },
        );

        assert!((h.suspend)(&mut r, &ctx()).unwrap());
        assert_eq!(r.spec, ResourceSpec::Workload { replicas: 0 });
        assert_eq!(r.annotation(SNAPSHOT_ANNOTATION), Some(r#"{"replicas":3}"#));

        // Second suspend changes nothing and keeps the original count.
        let before = r.clone();
        assert!(!(h.suspend)(&mut r, &ctx()).unwrap());
        assert_eq!(r, before);

        assert!((h.resume)(&mut r, &ctx()).unwrap());
        assert_eq!(r.spec, ResourceSpec::Workload { replicas: 3 });
        assert_eq!(r.annotation(SNAPSHOT_ANNOTATION), None);
    }

    #[test]
    fn test_zero_replicas_are_snapshotted() {
        let h = handler(ResourceKind::StatefulSet);
        let mut r = Resource::new(
            ResourceKind::StatefulSet,
            "ns",
            "db",
            ResourceSpec::Workload { replicas: 0 },
        );

        assert!((h.suspend)(&mut r, &ctx()).unwrap());
        assert_eq!(r.annotation(SNAPSHOT_ANNOTATION), Some(r#"{"replicas":0}"#));
        (h.resume)(&mut r, &ctx()).unwrap();
        assert_eq!(r.spec, ResourceSpec::Workload { replicas: 0 });
    }

    #[test]
    fn test_workload_default_without_snapshot() {
        let h = handler(ResourceKind::Deployment);
        let mut r = Resource::new(
            ResourceKind::Deployment,
            "ns",
            "web",
            ResourceSpec::Workload { replicas: 0 },
        );
        assert!((h.resume)(&mut r, &ctx()).unwrap());
        assert_eq!(
            r.spec,
            ResourceSpec::Workload {
                replicas: DEFAULT_REPLICAS
            }
        );
    }

    #[test]
    fn test_owned_workloads_are_skipped() {
        let h = handler(ResourceKind::ReplicaSet);
        let mut r = Resource::new(
            ResourceKind::ReplicaSet,
            "ns",
            "web-abc",
            ResourceSpec::Workload { replicas: 2 },
        );
        assert!(h.applies_to(&r));
        r.metadata.owner_references.push(OwnerReference {
            kind: "Deployment".to_string(),
            name: "web".to_string(),
        });
        assert!(!h.applies_to(&r));
    }

    #[test]
    fn test_cronjob_default_is_not_suspended() {
        let h = handler(ResourceKind::CronJob);
        let mut r = Resource::new(
            ResourceKind::CronJob,
            "ns",
            "nightly",
            ResourceSpec::Suspendable { suspend: true },
        );
        assert!((h.resume)(&mut r, &ctx()).unwrap());
        assert_eq!(r.spec, ResourceSpec::Suspendable { suspend: false });
    }

    #[test]
    fn test_cluster_snapshot_and_start() {
        let h = handler(ResourceKind::Cluster);
        let mut r = Resource::new(
            ResourceKind::Cluster,
            "ns",
            "pg",
            ResourceSpec::Cluster {
                phase: ClusterPhase::Running,
                backup_enabled: true,
            },
        );

        assert!((h.suspend)(&mut r, &ctx()).unwrap());
        assert_eq!(
            r.spec,
            ResourceSpec::Cluster {
                phase: ClusterPhase::Running,
                backup_enabled: false
            }
        );

        // The operator stops it.
        r.spec = ResourceSpec::Cluster {
            phase: ClusterPhase::Stopped,
            backup_enabled: false,
        };
        assert!(cluster_needs_start(&r));
        assert!((h.resume)(&mut r, &ctx()).unwrap());
        assert_eq!(
            r.spec,
            ResourceSpec::Cluster {
                phase: ClusterPhase::Stopped,
                backup_enabled: true
            }
        );
    }

    #[test]
    fn test_stopped_cluster_stays_stopped() {
        let h = handler(ResourceKind::Cluster);
        let mut r = Resource::new(
            ResourceKind::Cluster,
            "ns",
            "pg",
            ResourceSpec::Cluster {
                phase: ClusterPhase::Stopped,
                backup_enabled: false,
            },
        );
        (h.suspend)(&mut r, &ctx()).unwrap();
        assert!(!cluster_needs_start(&r));
    }

    #[test]
    fn test_certificate_and_ingress() {
        let mut cert = Resource::new(
            ResourceKind::Certificate,
            "ns",
            "tls",
            ResourceSpec::Certificate { reissue: true },
        );
        let h = handler(ResourceKind::Certificate);
        (h.suspend)(&mut cert, &ctx()).unwrap();
        assert_eq!(cert.spec, ResourceSpec::Certificate { reissue: false });
        (h.resume)(&mut cert, &ctx()).unwrap();
        assert_eq!(cert.spec, ResourceSpec::Certificate { reissue: true });

        let mut ingress = Resource::new(
            ResourceKind::Ingress,
            "ns",
            "web",
            ResourceSpec::Ingress {
                class: Some("nginx".to_string()),
            },
        );
        let h = handler(ResourceKind::Ingress);
        (h.suspend)(&mut ingress, &ctx()).unwrap();
        assert_eq!(
            ingress.spec,
            ResourceSpec::Ingress {
                class: Some("pause".to_string())
            }
        );
        ingress.metadata.annotations.clear();
        (h.resume)(&mut ingress, &ctx()).unwrap();
        assert_eq!(
            ingress.spec,
            ResourceSpec::Ingress {
                class: Some("nginx".to_string())
            }
        );
    }

    #[test]
    fn test_resume_order() {
        let order = SuspendStage::resume_order(&SuspendStage::DEFAULT_ORDER);
        assert_eq!(order.first(), Some(&SuspendStage::Quota));
        assert_eq!(order.last(), Some(&SuspendStage::ObjectStorage));
        assert_eq!(order.len(), SuspendStage::DEFAULT_ORDER.len());

        let partial = SuspendStage::resume_order(&[SuspendStage::Workloads]);
        assert_eq!(partial, vec![SuspendStage::Workloads]);
    }
}
