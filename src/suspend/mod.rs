//! Resource suspension: freezing, restoring and deleting a tenant namespace.

mod engine;
mod handlers;
mod object_storage;
mod snapshot;

pub use engine::{EngineSettings, SuspensionEngine};
pub use handlers::SuspendStage;
pub use object_storage::{ObjectStorageAdmin, ObjectStorageClients};
#[cfg(test)]
pub use snapshot::SNAPSHOT_ANNOTATION;
