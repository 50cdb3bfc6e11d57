//! RIFT Fabric Protocol Module
//!
//! This module defines the wire-level data model of the fabric routing
//! protocol and the pure decision logic built on it:
//! - System, TIE and prefix identifiers
//! - TIE payloads and flooding packets with their binary codec
//! - TIE header and prefix sequence comparators
//! - Route type preference and best-route selection
//! - The injectable `FabricConfig` carrying the protocol constants

pub mod compare;
pub mod config;
pub mod element;
pub mod error;
pub mod packet;
pub mod prefix;
pub mod route;
pub mod types;

pub use compare::{compare_prefix_sequences, compare_tie_headers, HeaderAge};
pub use config::FabricConfig;
pub use element::{
    KeyValueTieElement, LinkIdPair, NodeFlags, NodeNeighborsTieElement, NodeTieElement,
    PrefixAttributes, PrefixTieElement, Tie, TieElement,
};
pub use error::{ProtocolError, Result};
pub use packet::{PacketContent, ProtocolPacket, Tide, Tire};
pub use prefix::{IpAddress, IpPrefix};
pub use route::{prefer, select_best, RouteCandidate, RouteTable, RouteType};
pub use types::{
    Direction, IeeeTimestamp, NeighborDirection, PrefixSequence, SystemId, TieHeader, TieId,
    TieType,
};
