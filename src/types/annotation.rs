//! Namespace annotation vocabulary.
//!
//! Two annotations on a tenant namespace form the public contract between the
//! debt reconciler, the namespace controller and any UI watching them:
//!
//! | Key                        | Requested values                                  |
//! |----------------------------|---------------------------------------------------|
//! | `debt.sealos/status`       | Suspend, Resume, FinalDeletion, TerminateSuspend  |
//! | `network.sealos.io/status` | Suspend, Resume                                   |
//!
//! Each requested value `X` has a terminal counterpart `XCompleted`, written
//! only after the matching action succeeded.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

pub const DEBT_STATUS_KEY: &str = "debt.sealos/status";
pub const NETWORK_STATUS_KEY: &str = "network.sealos.io/status";

const COMPLETED_SUFFIX: &str = "Completed";

/// Action the suspension engine runs for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspendAction {
    Suspend,
    Resume,
    Delete,
}

impl SuspendAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspendAction::Suspend => "suspend",
            SuspendAction::Resume => "resume",
            SuspendAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SuspendAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vocabulary of one annotation key.
pub trait SignalKind: Copy + Eq + Debug {
    /// Annotation key this vocabulary lives under.
    const KEY: &'static str;

    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;

    /// Engine action a request of this kind maps to.
    fn action(&self) -> SuspendAction;
}

/// Requests carried by `debt.sealos/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebtSignal {
    Suspend,
    Resume,
    FinalDeletion,
    TerminateSuspend,
}

impl SignalKind for DebtSignal {
    const KEY: &'static str = DEBT_STATUS_KEY;

    fn name(&self) -> &'static str {
        match self {
            DebtSignal::Suspend => "Suspend",
            DebtSignal::Resume => "Resume",
            DebtSignal::FinalDeletion => "FinalDeletion",
            DebtSignal::TerminateSuspend => "TerminateSuspend",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Suspend" => Some(DebtSignal::Suspend),
            "Resume" => Some(DebtSignal::Resume),
            "FinalDeletion" => Some(DebtSignal::FinalDeletion),
            "TerminateSuspend" => Some(DebtSignal::TerminateSuspend),
            _ => None,
        }
    }

    fn action(&self) -> SuspendAction {
        match self {
            DebtSignal::Suspend | DebtSignal::TerminateSuspend => SuspendAction::Suspend,
            DebtSignal::Resume => SuspendAction::Resume,
            DebtSignal::FinalDeletion => SuspendAction::Delete,
        }
    }
}

/// Requests carried by `network.sealos.io/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkSignal {
    Suspend,
    Resume,
}

impl SignalKind for NetworkSignal {
    const KEY: &'static str = NETWORK_STATUS_KEY;

    fn name(&self) -> &'static str {
        match self {
            NetworkSignal::Suspend => "Suspend",
            NetworkSignal::Resume => "Resume",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Suspend" => Some(NetworkSignal::Suspend),
            "Resume" => Some(NetworkSignal::Resume),
            _ => None,
        }
    }

    fn action(&self) -> SuspendAction {
        match self {
            NetworkSignal::Suspend => SuspendAction::Suspend,
            NetworkSignal::Resume => SuspendAction::Resume,
        }
    }
}

/// A requested value or its completed counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal<K> {
    Requested(K),
    Completed(K),
}

impl<K: SignalKind> Signal<K> {
    /// Parse an annotation value. Unknown values (including legacy "Normal") yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.strip_suffix(COMPLETED_SUFFIX) {
            Some(base) => K::from_name(base).map(Signal::Completed),
            None => K::from_name(value).map(Signal::Requested),
        }
    }

    /// Wire representation written to the annotation.
    pub fn value(&self) -> String {
        match self {
            Signal::Requested(kind) => kind.name().to_string(),
            Signal::Completed(kind) => format!("{}{}", kind.name(), COMPLETED_SUFFIX),
        }
    }

    pub fn kind(&self) -> K {
        match self {
            Signal::Requested(kind) | Signal::Completed(kind) => *kind,
        }
    }

    pub fn requested(&self) -> Option<K> {
        match self {
            Signal::Requested(kind) => Some(*kind),
            Signal::Completed(_) => None,
        }
    }
}

pub type DebtAnnotation = Signal<DebtSignal>;
pub type NetworkAnnotation = Signal<NetworkSignal>;
