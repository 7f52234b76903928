//! Debt tiers: calculation, persistence and the reconciliation loops.

mod coordinator;
mod reconciler;
mod scheduler;
mod status;
mod tier;

pub use coordinator::Coordinator;
pub use reconciler::{Reconciler, Refresh};
pub use scheduler::{Scheduler, every};
pub use status::DebtStatusStore;
pub use tier::DebtThresholds;
