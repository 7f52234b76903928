mod annotation;
mod debt;
mod tenant;
mod transfer;

pub use annotation::*;
pub use debt::*;
pub use tenant::*;
pub use transfer::*;
