//! Annotation rule table.
//!
//! Maps the `debt.sealos/status` and `network.sealos.io/status` values found
//! on a namespace to the engine action to run and the completed values to
//! write afterwards. Completed, absent and unknown values all count as
//! "nothing requested".
//!
//! | debt            | network         | action                       |
//! |-----------------|-----------------|------------------------------|
//! | requested       | absent          | debt request                 |
//! | absent          | requested       | network request              |
//! | requested       | requested       | delete > suspend > resume    |
//! | completed       | requested       | network request              |
//! | absent          | absent          | none                         |

use std::collections::BTreeMap;

use crate::types::{
    DebtAnnotation, DebtSignal, NetworkAnnotation, NetworkSignal, Signal, SignalKind,
    SuspendAction,
};

/// What to do for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plan {
    pub action: Option<SuspendAction>,
    /// Completed value to write for the debt annotation.
    pub debt: Option<DebtAnnotation>,
    /// Completed value to write for the network annotation.
    pub network: Option<NetworkAnnotation>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.action.is_none() && self.debt.is_none() && self.network.is_none()
    }
}

/// The debt annotation records that the tenant's resources are held down.
fn holds_suspension(debt: Option<DebtAnnotation>) -> bool {
    matches!(
        debt,
        Some(Signal::Completed(
            DebtSignal::Suspend | DebtSignal::TerminateSuspend | DebtSignal::FinalDeletion
        ))
    )
}

pub fn plan(debt: Option<DebtAnnotation>, network: Option<NetworkAnnotation>) -> Plan {
    let debt_request = debt.and_then(|d| d.requested());
    let network_request = network.and_then(|n| n.requested());

    match (debt_request, network_request) {
        (Some(d), None) => Plan {
            action: Some(d.action()),
            debt: Some(Signal::Completed(d)),
            network: None,
        },
        (None, Some(n)) => {
            // Lifting a network suspension must not resume a tenant in debt.
            let action = if n == NetworkSignal::Resume && holds_suspension(debt) {
                None
            } else {
                Some(n.action())
            };
            Plan {
                action,
                debt: None,
                network: Some(Signal::Completed(n)),
            }
        }
        (Some(d), Some(n)) => {
            let action = if d == DebtSignal::FinalDeletion {
                SuspendAction::Delete
            } else if d.action() == SuspendAction::Suspend || n.action() == SuspendAction::Suspend {
                SuspendAction::Suspend
            } else {
                SuspendAction::Resume
            };
            Plan {
                action: Some(action),
                debt: Some(Signal::Completed(d)),
                network: Some(Signal::Completed(n)),
            }
        }
        (None, None) => Plan::default(),
    }
}

/// Whether a namespace carries any request the controller must act on.
pub fn has_request(debt: Option<DebtAnnotation>, network: Option<NetworkAnnotation>) -> bool {
    debt.and_then(|d| d.requested()).is_some() || network.and_then(|n| n.requested()).is_some()
}

/// Parse the value stored under `K::KEY`.
pub fn read<K: SignalKind>(annotations: &BTreeMap<String, String>) -> Option<Signal<K>> {
    annotations.get(K::KEY).and_then(|v| Signal::<K>::parse(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debt(v: &str) -> Option<DebtAnnotation> {
        DebtAnnotation::parse(v)
    }

    fn net(v: &str) -> Option<NetworkAnnotation> {
        NetworkAnnotation::parse(v)
    }

    #[test]
    fn test_debt_only() {
        let cases = [
            ("Suspend", SuspendAction::Suspend, "SuspendCompleted"),
            ("TerminateSuspend", SuspendAction::Suspend, "TerminateSuspendCompleted"),
            ("Resume", SuspendAction::Resume, "ResumeCompleted"),
            ("FinalDeletion", SuspendAction::Delete, "FinalDeletionCompleted"),
        ];
        for (value, action, completed) in cases {
            let p = plan(debt(value), None);
            assert_eq!(p.action, Some(action), "{}", value);
            assert_eq!(p.debt.map(|d| d.value()).as_deref(), Some(completed));
            assert_eq!(p.network, None);
        }
    }

    #[test]
    fn test_network_only() {
        let p = plan(None, net("Suspend"));
        assert_eq!(p.action, Some(SuspendAction::Suspend));
        assert_eq!(p.network.map(|n| n.value()).as_deref(), Some("SuspendCompleted"));
        assert_eq!(p.debt, None);

        let p = plan(None, net("Resume"));
        assert_eq!(p.action, Some(SuspendAction::Resume));
    }

    #[test]
    fn test_both_requested() {
        let p = plan(debt("FinalDeletion"), net("Resume"));
        assert_eq!(p.action, Some(SuspendAction::Delete));
        assert_eq!(p.debt.map(|d| d.value()).as_deref(), Some("FinalDeletionCompleted"));
        assert_eq!(p.network.map(|n| n.value()).as_deref(), Some("ResumeCompleted"));

        assert_eq!(plan(debt("Resume"), net("Suspend")).action, Some(SuspendAction::Suspend));
        assert_eq!(plan(debt("Suspend"), net("Resume")).action, Some(SuspendAction::Suspend));
        assert_eq!(plan(debt("Resume"), net("Resume")).action, Some(SuspendAction::Resume));
    }

    #[test]
    fn test_debt_completed_network_pending() {
        let p = plan(debt("ResumeCompleted"), net("Suspend"));
        assert_eq!(p.action, Some(SuspendAction::Suspend));
        assert_eq!(p.debt, None);

        // Still in debt: acknowledge the network resume without resuming.
        let p = plan(debt("SuspendCompleted"), net("Resume"));
        assert_eq!(p.action, None);
        assert_eq!(p.network.map(|n| n.value()).as_deref(), Some("ResumeCompleted"));
        assert!(!p.is_noop());
    }

    #[test]
    fn test_terminal_states_are_noops() {
        assert!(plan(None, None).is_noop());
        assert!(plan(debt("SuspendCompleted"), None).is_noop());
        assert!(plan(debt("SuspendCompleted"), net("SuspendCompleted")).is_noop());
        assert!(plan(debt("Normal"), net("bogus")).is_noop());
        assert!(!has_request(debt("FinalDeletionCompleted"), net("ResumeCompleted")));
        assert!(has_request(None, net("Resume")));
    }
}
