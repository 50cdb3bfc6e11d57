//! Flood reduction policy
//!
//! Which links act as flood repeaters is decided by the adjacency layer.
//! The reconciler only asks, per link and per TIE, whether to flood.

use rift_protocol::TieHeader;

use crate::link::LinkInfo;

/// Per-link, per-TIE flood decision supplied by the adjacency layer
pub trait FloodRepeaterPolicy: Send + Sync {
    fn should_flood(&self, link: &LinkInfo, header: &TieHeader) -> bool;
}

/// Flood on every link the scope rules allow
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodEverywhere;

impl FloodRepeaterPolicy for FloodEverywhere {
    fn should_flood(&self, _link: &LinkInfo, _header: &TieHeader) -> bool {
        true
    }
}

impl<F> FloodRepeaterPolicy for F
where
    F: Fn(&LinkInfo, &TieHeader) -> bool + Send + Sync,
{
    fn should_flood(&self, link: &LinkInfo, header: &TieHeader) -> bool {
        self(link, header)
    }
}
