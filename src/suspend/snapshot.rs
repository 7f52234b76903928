//! Pre-suspension state stored on the resource itself.
//!
//! Each kind serializes a small JSON document into [`SNAPSHOT_ANNOTATION`]
//! before it is suspended. The annotation's presence means "suspended by the
//! engine"; resume consumes and removes it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::ObjectMeta;

pub const SNAPSHOT_ANNOTATION: &str = "debt.sealos/original-suspend-state";

/// Scheduler an orphan pod used before it was moved to the debt scheduler.
pub const PREVIOUS_SCHEDULER_ANNOTATION: &str = "debt.sealos/previous-scheduler";

/// Deployments, StatefulSets and ReplicaSets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub replicas: i32,
}

/// CronJobs and Jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendFlagSnapshot {
    pub suspend: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub was_running: bool,
    pub backup_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSnapshot {
    pub reissue: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressSnapshot {
    pub class: Option<String>,
}

pub fn is_suspended(meta: &ObjectMeta) -> bool {
    meta.annotations.contains_key(SNAPSHOT_ANNOTATION)
}

/// Record `snapshot` unless one is already present. Returns whether it wrote.
pub fn store<T: Serialize>(meta: &mut ObjectMeta, snapshot: &T) -> Result<bool, serde_json::Error> {
    if is_suspended(meta) {
        return Ok(false);
    }
    let encoded = serde_json::to_string(snapshot)?;
    meta.annotations
        .insert(SNAPSHOT_ANNOTATION.to_string(), encoded);
    Ok(true)
}

/// Read the snapshot without removing it. An undecodable snapshot reads as absent.
pub fn peek<T: DeserializeOwned>(meta: &ObjectMeta) -> Option<T> {
    let raw = meta.annotations.get(SNAPSHOT_ANNOTATION)?;
    match serde_json::from_str(raw) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(resource = %meta.name, namespace = %meta.namespace, error = %e, "ignoring corrupt suspend snapshot");
            None
        }
    }
}

/// Remove and decode the snapshot. An undecodable snapshot is dropped and reads as absent.
pub fn take<T: DeserializeOwned>(meta: &mut ObjectMeta) -> Option<T> {
    let snapshot = peek(meta);
    meta.annotations.remove(SNAPSHOT_ANNOTATION);
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_once() {
        let mut meta = ObjectMeta::new("ns", "web");
        assert!(store(&mut meta, &WorkloadSnapshot { replicas: 3 }).unwrap());
        assert!(!store(&mut meta, &WorkloadSnapshot { replicas: 0 }).unwrap());

        assert_eq!(
            meta.annotations.get(SNAPSHOT_ANNOTATION).map(String::as_str),
            Some(r#"{"replicas":3}"#)
        );
    }

    #[test]
    fn test_take_removes() {
        let mut meta = ObjectMeta::new("ns", "db");
        store(
            &mut meta,
            &ClusterSnapshot {
                was_running: true,
                backup_enabled: false,
            },
        )
        .unwrap();
        assert!(meta.annotations[SNAPSHOT_ANNOTATION].contains("wasRunning"));

        let snapshot: Option<ClusterSnapshot> = take(&mut meta);
        assert_eq!(
            snapshot,
            Some(ClusterSnapshot {
                was_running: true,
                backup_enabled: false
            })
        );
        assert!(!is_suspended(&meta));
    }

    #[test]
    fn test_corrupt_snapshot_reads_as_absent() {
        let mut meta = ObjectMeta::new("ns", "web");
        meta.annotations
            .insert(SNAPSHOT_ANNOTATION.to_string(), "{not json".to_string());

        let snapshot: Option<WorkloadSnapshot> = take(&mut meta);
        assert_eq!(snapshot, None);
        assert!(!is_suspended(&meta));
    }
}
