//! Namespace controller: turns debt and network annotations into engine actions.

mod namespace;
mod rules;

pub use namespace::{ControllerSettings, NamespaceController};
