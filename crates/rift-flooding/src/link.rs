//! Flooding adjacency identity

use rift_protocol::{FabricConfig, NeighborDirection, SystemId};
use std::fmt;

/// Local identifier of an adjacency, assigned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u32);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// What the adjacency layer knows about the neighbor on a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub link_id: LinkId,
    pub neighbor: SystemId,
    pub neighbor_level: u8,
    /// The neighbor's identifier for the same link, when it reported one
    pub remote_link_id: Option<u32>,
}

impl LinkInfo {
    pub fn new(link_id: LinkId, neighbor: SystemId, neighbor_level: u8) -> Self {
        LinkInfo {
            link_id,
            neighbor,
            neighbor_level,
            remote_link_id: None,
        }
    }

    pub fn with_remote_link_id(mut self, remote_link_id: u32) -> Self {
        self.remote_link_id = Some(remote_link_id);
        self
    }

    /// Where the neighbor sits as seen from a node at `my_level`
    pub fn direction(&self, my_level: u8) -> NeighborDirection {
        NeighborDirection::from_levels(my_level, self.neighbor_level)
    }

    pub fn neighbor_is_top_of_fabric(&self, config: &FabricConfig) -> bool {
        config.is_top_of_fabric(self.neighbor_level)
    }
}

impl fmt::Display for LinkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (neighbor {} level {})",
            self.link_id, self.neighbor, self.neighbor_level
        )
    }
}
