//! In-process cluster backed by a YAML state file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::model::{Namespace, Resource, ResourceKind, object_key};
use super::{ClusterApi, ClusterError};

#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Serializable snapshot of every namespace and resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

type ObjectId = (ResourceKind, String, String);

#[derive(Debug, Default)]
struct Store {
    namespaces: BTreeMap<String, Namespace>,
    resources: BTreeMap<ObjectId, Resource>,
    version: u64,
}

impl Store {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// A [`ClusterApi`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    store: RwLock<Store>,
    failing: std::sync::Mutex<HashSet<ResourceKind>>,
    failing_namespaces: AtomicBool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: ClusterState) -> Self {
        let mut store = Store::default();
        for namespace in state.namespaces {
            store.version = store.version.max(namespace.resource_version);
            store.namespaces.insert(namespace.name.clone(), namespace);
        }
        for resource in state.resources {
            store.version = store.version.max(resource.metadata.resource_version);
            let id = (
                resource.kind,
                resource.metadata.namespace.clone(),
                resource.metadata.name.clone(),
            );
            store.resources.insert(id, resource);
        }
        Self {
            store: RwLock::new(store),
            failing: Default::default(),
            failing_namespaces: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> ClusterState {
        let store = self.store.read().await;
        ClusterState {
            namespaces: store.namespaces.values().cloned().collect(),
            resources: store.resources.values().cloned().collect(),
        }
    }

    /// Load a state file.
    pub fn load(path: &Path) -> Result<Self, StateFileError> {
        let content = std::fs::read_to_string(path)?;
        let state: ClusterState = serde_yaml::from_str(&content)?;
        Ok(Self::from_state(state))
    }

    /// Write the current state back to a file.
    pub async fn save(&self, path: &Path) -> Result<(), StateFileError> {
        let content = serde_yaml::to_string(&self.state().await)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn create_namespace(&self, mut namespace: Namespace) -> Result<Namespace, ClusterError> {
        let mut store = self.store.write().await;
        if store.namespaces.contains_key(&namespace.name) {
            return Err(ClusterError::AlreadyExists(format!("Namespace/{}", namespace.name)));
        }
        namespace.resource_version = store.next_version();
        store.namespaces.insert(namespace.name.clone(), namespace.clone());
        Ok(namespace)
    }

    /// Make every call touching `kind` fail until cleared.
    #[cfg(test)]
    pub fn fail_kind(&self, kind: ResourceKind, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(kind);
            } else {
                set.remove(&kind);
            }
        }
    }

    /// Make every namespace call fail until cleared.
    #[cfg(test)]
    pub fn fail_namespaces(&self, failing: bool) {
        self.failing_namespaces.store(failing, Ordering::SeqCst);
    }

    fn check_namespaces(&self) -> Result<(), ClusterError> {
        if self.failing_namespaces.load(Ordering::SeqCst) {
            return Err(ClusterError::Transient("injected failure for Namespace".to_string()));
        }
        Ok(())
    }

    fn check(&self, kind: ResourceKind) -> Result<(), ClusterError> {
        let failing = self
            .failing
            .lock()
            .map(|set| set.contains(&kind))
            .unwrap_or(false);
        if failing {
            return Err(ClusterError::Transient(format!("injected failure for {}", kind)));
        }
        Ok(())
    }
}

impl ClusterApi for MemoryCluster {
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<Resource>, ClusterError> {
        self.check(kind)?;
        let store = self.store.read().await;
        Ok(store
            .resources
            .values()
            .filter(|r| r.kind == kind && r.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, ClusterError> {
        self.check(kind)?;
        let store = self.store.read().await;
        store
            .resources
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(object_key(kind, namespace, name)))
    }

    async fn create(&self, mut resource: Resource) -> Result<Resource, ClusterError> {
        self.check(resource.kind)?;
        let mut store = self.store.write().await;
        let id = (
            resource.kind,
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        if store.resources.contains_key(&id) {
            return Err(ClusterError::AlreadyExists(resource.key()));
        }
        resource.metadata.resource_version = store.next_version();
        store.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn update(&self, mut resource: Resource) -> Result<Resource, ClusterError> {
        self.check(resource.kind)?;
        let mut store = self.store.write().await;
        let id = (
            resource.kind,
            resource.metadata.namespace.clone(),
            resource.metadata.name.clone(),
        );
        let stored = store
            .resources
            .get(&id)
            .map(|r| r.metadata.resource_version)
            .ok_or_else(|| ClusterError::NotFound(resource.key()))?;
        if stored != resource.metadata.resource_version {
            return Err(ClusterError::Conflict(resource.key()));
        }
        resource.metadata.resource_version = store.next_version();
        store.resources.insert(id, resource.clone());
        Ok(resource)
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.check(kind)?;
        let mut store = self.store.write().await;
        store
            .resources
            .remove(&(kind, namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(object_key(kind, namespace, name)))
    }

    async fn delete_all(&self, kind: ResourceKind, namespace: &str) -> Result<usize, ClusterError> {
        self.check(kind)?;
        let mut store = self.store.write().await;
        let before = store.resources.len();
        store
            .resources
            .retain(|(k, ns, _), _| !(*k == kind && ns == namespace));
        Ok(before - store.resources.len())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        self.check_namespaces()?;
        let store = self.store.read().await;
        Ok(store.namespaces.values().cloned().collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        self.check_namespaces()?;
        let store = self.store.read().await;
        store
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Namespace/{}", name)))
    }

    async fn update_namespace(&self, mut namespace: Namespace) -> Result<Namespace, ClusterError> {
        self.check_namespaces()?;
        let mut store = self.store.write().await;
        let stored = store
            .namespaces
            .get(&namespace.name)
            .map(|ns| ns.resource_version)
            .ok_or_else(|| ClusterError::NotFound(format!("Namespace/{}", namespace.name)))?;
        if stored != namespace.resource_version {
            return Err(ClusterError::Conflict(format!("Namespace/{}", namespace.name)));
        }
        namespace.resource_version = store.next_version();
        store.namespaces.insert(namespace.name.clone(), namespace.clone());
        Ok(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ResourceSpec;

    fn deployment(name: &str, replicas: i32) -> Resource {
        Resource::new(
            ResourceKind::Deployment,
            "ns-a",
            name,
            ResourceSpec::Workload { replicas },
        )
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let cluster = MemoryCluster::new();
        cluster.create(deployment("web", 2)).await.unwrap();

        let err = cluster.create(deployment("web", 2)).await.unwrap_err();
        assert!(err.is_already_exists());

        let got = cluster.get(ResourceKind::Deployment, "ns-a", "web").await.unwrap();
        assert_eq!(got.spec, ResourceSpec::Workload { replicas: 2 });

        cluster.delete(ResourceKind::Deployment, "ns-a", "web").await.unwrap();
        let err = cluster
            .delete(ResourceKind::Deployment, "ns-a", "web")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let cluster = MemoryCluster::new();
        let created = cluster.create(deployment("web", 2)).await.unwrap();

        let mut first = created.clone();
        first.spec = ResourceSpec::Workload { replicas: 0 };
        cluster.update(first).await.unwrap();

        let err = cluster.update(created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_all_is_scoped() {
        let cluster = MemoryCluster::new();
        cluster.create(deployment("a", 1)).await.unwrap();
        cluster.create(deployment("b", 1)).await.unwrap();
        let mut other = deployment("c", 1);
        other.metadata.namespace = "ns-b".to_string();
        cluster.create(other).await.unwrap();

        assert_eq!(
            cluster.delete_all(ResourceKind::Deployment, "ns-a").await.unwrap(),
            2
        );
        assert_eq!(cluster.list(ResourceKind::Deployment, "ns-b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.yaml");

        let cluster = MemoryCluster::new();
        cluster
            .create_namespace(Namespace::for_owner("ns-a", "a"))
            .await
            .unwrap();
        cluster.create(deployment("web", 3)).await.unwrap();
        cluster.save(&path).await.unwrap();

        let loaded = MemoryCluster::load(&path).unwrap();
        assert_eq!(loaded.state().await, cluster.state().await);

        // Versions keep increasing after a reload.
        let created = loaded.create(deployment("api", 1)).await.unwrap();
        assert!(created.metadata.resource_version > 2);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cluster = MemoryCluster::new();
        cluster.fail_kind(ResourceKind::Deployment, true);
        assert!(matches!(
            cluster.list(ResourceKind::Deployment, "ns-a").await,
            Err(ClusterError::Transient(_))
        ));
        cluster.fail_kind(ResourceKind::Deployment, false);
        assert!(cluster.list(ResourceKind::Deployment, "ns-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_namespace_failure() {
        let cluster = MemoryCluster::new();
        let ns = cluster
            .create_namespace(Namespace::for_owner("ns-a", "a"))
            .await
            .unwrap();

        cluster.fail_namespaces(true);
        assert!(matches!(cluster.list_namespaces().await, Err(ClusterError::Transient(_))));
        assert!(matches!(cluster.get_namespace("ns-a").await, Err(ClusterError::Transient(_))));
        assert!(matches!(
            cluster.update_namespace(ns.clone()).await,
            Err(ClusterError::Transient(_))
        ));

        cluster.fail_namespaces(false);
        assert!(cluster.update_namespace(ns).await.is_ok());
    }
}
