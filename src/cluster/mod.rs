//! Cluster resource API boundary.
//!
//! The engine and controller only talk to the cluster through [`ClusterApi`]:
//! list/get/create/update/delete on namespaced resources plus the namespace
//! objects themselves. Updates are optimistic: a stale `resource_version`
//! yields [`ClusterError::Conflict`] and callers re-read and retry through
//! [`update_resource`] / [`update_namespace`].

mod memory;
mod model;

pub use memory::MemoryCluster;
pub use model::{Namespace, ObjectMeta, OpsType, Resource, ResourceKind, ResourceSpec};
#[cfg(test)]
pub use model::{ClusterPhase, OwnerReference};

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("cluster API call timed out after {0:?}")]
    Timeout(Duration),

    #[error("cluster API error: {0}")]
    Transient(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

/// Operations on the cluster the suspension engine and controllers need.
pub trait ClusterApi: Send + Sync {
    fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<Resource>, ClusterError>> + Send;

    fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Resource, ClusterError>> + Send;

    fn create(&self, resource: Resource) -> impl Future<Output = Result<Resource, ClusterError>> + Send;

    /// Replace a resource. Fails with `Conflict` if `resource_version` is stale.
    fn update(&self, resource: Resource) -> impl Future<Output = Result<Resource, ClusterError>> + Send;

    fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Delete every resource of `kind` in the namespace. Returns how many went.
    fn delete_all(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> impl Future<Output = Result<usize, ClusterError>> + Send;

    fn list_namespaces(&self) -> impl Future<Output = Result<Vec<Namespace>, ClusterError>> + Send;

    fn get_namespace(&self, name: &str) -> impl Future<Output = Result<Namespace, ClusterError>> + Send;

    /// Replace a namespace. Fails with `Conflict` if `resource_version` is stale.
    fn update_namespace(
        &self,
        namespace: Namespace,
    ) -> impl Future<Output = Result<Namespace, ClusterError>> + Send;
}

/// Bounds every call on the wrapped client by a fixed timeout.
#[derive(Debug)]
pub struct Timed<C> {
    inner: C,
    timeout: Duration,
}

impl<C: ClusterApi> Timed<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn within<T>(
        &self,
        call: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<T, ClusterError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ClusterError::Timeout(self.timeout))?
    }
}

impl<C: ClusterApi> ClusterApi for Timed<C> {
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<Resource>, ClusterError> {
        self.within(self.inner.list(kind, namespace)).await
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Resource, ClusterError> {
        self.within(self.inner.get(kind, namespace, name)).await
    }

    async fn create(&self, resource: Resource) -> Result<Resource, ClusterError> {
        self.within(self.inner.create(resource)).await
    }

    async fn update(&self, resource: Resource) -> Result<Resource, ClusterError> {
        self.within(self.inner.update(resource)).await
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.within(self.inner.delete(kind, namespace, name)).await
    }

    async fn delete_all(&self, kind: ResourceKind, namespace: &str) -> Result<usize, ClusterError> {
        self.within(self.inner.delete_all(kind, namespace)).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        self.within(self.inner.list_namespaces()).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        self.within(self.inner.get_namespace(name)).await
    }

    async fn update_namespace(&self, namespace: Namespace) -> Result<Namespace, ClusterError> {
        self.within(self.inner.update_namespace(namespace)).await
    }
}

/// Read-modify-write a resource, retrying on conflict.
///
/// `mutate` returns `Ok(false)` when the resource is already in the desired
/// state; nothing is written then and `Ok(None)` is returned.
pub async fn update_resource<C, F, E>(
    cluster: &C,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    attempts: u32,
    mut mutate: F,
) -> Result<Option<Resource>, E>
where
    C: ClusterApi,
    F: FnMut(&mut Resource) -> Result<bool, E>,
    E: From<ClusterError>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut resource = cluster.get(kind, namespace, name).await?;
        if !mutate(&mut resource)? {
            return Ok(None);
        }
        match cluster.update(resource).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(e) if e.is_conflict() && attempt < attempts.max(1) => {
                tracing::debug!(%kind, namespace, name, attempt, "update conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read-modify-write a namespace, retrying on conflict. Same contract as
/// [`update_resource`].
pub async fn update_namespace<C, F>(
    cluster: &C,
    name: &str,
    attempts: u32,
    mut mutate: F,
) -> Result<Option<Namespace>, ClusterError>
where
    C: ClusterApi,
    F: FnMut(&mut Namespace) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut namespace = cluster.get_namespace(name).await?;
        if !mutate(&mut namespace) {
            return Ok(None);
        }
        match cluster.update_namespace(namespace).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(e) if e.is_conflict() && attempt < attempts.max(1) => {
                tracing::debug!(namespace = name, attempt, "namespace update conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Namespaces labelled as owned by `owner`.
pub async fn namespaces_owned_by<C: ClusterApi>(
    cluster: &C,
    owner: &str,
) -> Result<Vec<Namespace>, ClusterError> {
    Ok(cluster
        .list_namespaces()
        .await?
        .into_iter()
        .filter(|ns| ns.owner() == Some(owner))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_resource_skips_noop() {
        let cluster = MemoryCluster::new();
        cluster
            .create(Resource::new(
                ResourceKind::Deployment,
                "ns-a",
                "web",
                ResourceSpec::Workload { replicas: 0 },
            ))
            .await
            .unwrap();

        let result = update_resource(&cluster, ResourceKind::Deployment, "ns-a", "web", 3, |_| {
            Ok::<_, ClusterError>(false)
        })
        .await
        .unwrap();
        assert!(result.is_none());
        let stored = cluster.get(ResourceKind::Deployment, "ns-a", "web").await.unwrap();
        assert_eq!(stored.metadata.resource_version, 1);
    }

    #[tokio::test]
    async fn test_update_namespace_retries_conflict() {
        let cluster = MemoryCluster::new();
        cluster.create_namespace(Namespace::for_owner("ns-a", "a")).await.unwrap();

        let mut raced = false;
        let updated = update_namespace(&cluster, "ns-a", 3, |ns| {
            if !raced {
                // Simulate a concurrent writer bumping the version.
                raced = true;
                ns.resource_version = 0;
            }
            ns.annotations.insert("k".to_string(), "v".to_string());
            true
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.annotation("k"), Some("v"));
    }

    #[tokio::test]
    async fn test_namespaces_owned_by() {
        let cluster = MemoryCluster::new();
        cluster.create_namespace(Namespace::for_owner("ns-a", "a")).await.unwrap();
        cluster.create_namespace(Namespace::for_owner("ns-a-dev", "a")).await.unwrap();
        cluster.create_namespace(Namespace::for_owner("ns-b", "b")).await.unwrap();

        let owned: Vec<_> = namespaces_owned_by(&cluster, "a")
            .await
            .unwrap()
            .into_iter()
            .map(|ns| ns.name)
            .collect();
        assert_eq!(owned, vec!["ns-a".to_string(), "ns-a-dev".to_string()]);
    }

    #[tokio::test]
    async fn test_timed_maps_elapsed() {
        struct Stuck;

        impl ClusterApi for Stuck {
            async fn list(&self, _: ResourceKind, _: &str) -> Result<Vec<Resource>, ClusterError> {
                std::future::pending().await
            }
            async fn get(&self, _: ResourceKind, _: &str, n: &str) -> Result<Resource, ClusterError> {
                Err(ClusterError::NotFound(n.to_string()))
            }
            async fn create(&self, r: Resource) -> Result<Resource, ClusterError> {
                Ok(r)
            }
            async fn update(&self, r: Resource) -> Result<Resource, ClusterError> {
                Ok(r)
            }
            async fn delete(&self, _: ResourceKind, _: &str, _: &str) -> Result<(), ClusterError> {
                Ok(())
            }
            async fn delete_all(&self, _: ResourceKind, _: &str) -> Result<usize, ClusterError> {
                Ok(0)
            }
            async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
                Ok(Vec::new())
            }
            async fn get_namespace(&self, n: &str) -> Result<Namespace, ClusterError> {
                Err(ClusterError::NotFound(n.to_string()))
            }
            async fn update_namespace(&self, ns: Namespace) -> Result<Namespace, ClusterError> {
                Ok(ns)
            }
        }

        let timed = Timed::new(Stuck, Duration::from_millis(20));
        let err = timed.list(ResourceKind::Pod, "ns").await.unwrap_err();
        assert!(matches!(err, ClusterError::Timeout(_)));
        assert!(timed.get(ResourceKind::Pod, "ns", "p").await.unwrap_err().is_not_found());
    }
}
