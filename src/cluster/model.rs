//! Typed model of the namespaced cluster objects the engine touches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label carrying the owning tenant on every tenant namespace.
pub const OWNER_LABEL: &str = "user.sealos.io/owner";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    ReplicaSet,
    CronJob,
    Job,
    Pod,
    PersistentVolumeClaim,
    Service,
    Ingress,
    Certificate,
    Issuer,
    HorizontalPodAutoscaler,
    /// Managed database cluster.
    Cluster,
    /// Managed database backup.
    Backup,
    OpsRequest,
    ResourceQuota,
    AppInstance,
    Devbox,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Job => "Job",
            ResourceKind::Pod => "Pod",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Certificate => "Certificate",
            ResourceKind::Issuer => "Issuer",
            ResourceKind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            ResourceKind::Cluster => "Cluster",
            ResourceKind::Backup => "Backup",
            ResourceKind::OpsRequest => "OpsRequest",
            ResourceKind::ResourceQuota => "ResourceQuota",
            ResourceKind::AppInstance => "AppInstance",
            ResourceKind::Devbox => "Devbox",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,

    /// Optimistic-concurrency token; bumped by every write.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_owned(&self) -> bool {
        !self.owner_references.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterPhase {
    Running,
    Starting,
    Stopping,
    Stopped,
    #[serde(other)]
    Other,
}

impl ClusterPhase {
    pub fn is_stopped_or_stopping(&self) -> bool {
        matches!(self, ClusterPhase::Stopped | ClusterPhase::Stopping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpsType {
    Stop,
    Start,
}

impl OpsType {
    pub fn prefix(&self) -> &'static str {
        match self {
            OpsType::Stop => "stop",
            OpsType::Start => "start",
        }
    }
}

/// The slice of each kind's spec the suspension engine reads or writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// Deployments, StatefulSets and ReplicaSets.
    Workload { replicas: i32 },
    /// CronJobs and Jobs.
    Suspendable { suspend: bool },
    Pod {
        #[serde(default)]
        scheduler_name: Option<String>,
        #[serde(default)]
        node_name: Option<String>,
    },
    Cluster {
        phase: ClusterPhase,
        #[serde(default)]
        backup_enabled: bool,
    },
    OpsRequest { cluster_ref: String, op_type: OpsType },
    Certificate { reissue: bool },
    Ingress {
        #[serde(default)]
        class: Option<String>,
    },
    Quota { hard: BTreeMap<String, String> },
    #[default]
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ResourceSpec,
}

impl Resource {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: ResourceSpec,
    ) -> Self {
        Self {
            kind,
            metadata: ObjectMeta::new(namespace, name),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }

    /// `kind/namespace/name`, used in errors and logs.
    pub fn key(&self) -> String {
        object_key(self.kind, self.namespace(), self.name())
    }
}

pub fn object_key(kind: ResourceKind, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind, namespace, name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub resource_version: u64,
}

impl Namespace {
    /// A tenant namespace labelled with its owner.
    #[cfg(test)]
    pub fn for_owner(name: impl Into<String>, owner: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(OWNER_LABEL.to_string(), owner.to_string());
        Self {
            name: name.into(),
            labels,
            ..Default::default()
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.labels.get(OWNER_LABEL).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_yaml_shape() {
        let resource = Resource::new(
            ResourceKind::Deployment,
            "ns-alice",
            "web",
            ResourceSpec::Workload { replicas: 3 },
        );
        let yaml = serde_yaml::to_string(&resource).unwrap();
        assert!(yaml.contains("type: workload"));
        assert!(yaml.contains("replicas: 3"));

        let parsed: Resource = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, resource);
    }

    #[test]
    fn test_unknown_cluster_phase() {
        let spec: ResourceSpec =
            serde_yaml::from_str("type: cluster\nphase: Abnormal\n").unwrap();
        assert_eq!(
            spec,
            ResourceSpec::Cluster {
                phase: ClusterPhase::Other,
                backup_enabled: false
            }
        );
    }

    #[test]
    fn test_namespace_owner() {
        let ns = Namespace::for_owner("ns-alice", "alice");
        assert_eq!(ns.owner(), Some("alice"));
        assert_eq!(ns.annotation("missing"), None);
    }
}
