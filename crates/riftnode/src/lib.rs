//! riftnode
//!
//! Node process wiring the TIE database, lifetime aging and flooding
//! together from a YAML configuration. Transports attach their links
//! through the node's `LinkControl`.

pub mod config;
pub mod logging;
pub mod node;
pub mod origination;

pub use config::Config;
pub use node::{LinkControl, Node};
pub use origination::OwnTies;
