//! RIFT TIE Database
//!
//! This module holds the per-node store of Topology Information Elements:
//! - One TIE per TIEID, replaced only by strictly newer versions
//! - Origination of the node's own TIEs with monotonic sequence numbers
//! - Change notifications for flooding and route computation
//! - Lifetime aging and expiry

pub mod database;
pub mod error;
pub mod lifetime;

use std::sync::Arc;
use tokio::sync::RwLock;

pub use database::{StaleOrDuplicate, TieChange, TieDatabase, UpdateOutcome};
pub use error::{Result, TieDbError};
pub use lifetime::{LifetimeManager, DEFAULT_AGING_INTERVAL};

/// Database handle shared by flooding, aging and origination.
///
/// Writers hold the lock for a single operation; readers see either the
/// state before or after it.
pub type SharedTieDb = Arc<RwLock<TieDatabase>>;
