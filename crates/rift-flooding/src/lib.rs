//! RIFT Flooding
//!
//! This module keeps the TIE databases of adjacent nodes consistent:
//! - Flooding scope rules per TIE direction and neighbor position
//! - Per-link reconciliation over TIDE, TIRE and TIE exchanges
//! - Pluggable flood reduction policy
//! - Async per-link tasks and an engine managing them

pub mod engine;
pub mod error;
pub mod flooder;
pub mod link;
pub mod policy;
pub mod reconciler;
pub mod scope;

pub use engine::FloodingEngine;
pub use error::{FloodingError, Result};
pub use flooder::{FlooderConfig, LinkFlooder, LinkHandle};
pub use link::{LinkId, LinkInfo};
pub use policy::{FloodEverywhere, FloodRepeaterPolicy};
pub use reconciler::{LinkReconciler, LinkStats};
pub use scope::{
    flood_allowed_from_neighbor, flood_allowed_to_neighbor, is_flood_allowed, Endpoint,
    ScopeDecision,
};
