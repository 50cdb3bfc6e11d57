//! TIE payloads
//!
//! A `Tie` pairs a header with exactly one `TieElement` variant, and the
//! variant must agree with the header's `TieType`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::FabricConfig;
use crate::error::{ProtocolError, Result};
use crate::prefix::IpPrefix;
use crate::types::{PrefixSequence, SystemId, TieHeader, TieId, TieType};

bitflags! {
    /// Flags advertised in a node TIE
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NodeFlags: u8 {
        /// Node must not be used for transit
        const OVERLOAD = 0x01;
    }
}

/// Pair of local/remote link IDs identifying one parallel link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkIdPair {
    pub local_id: u32,
    pub remote_id: u32,
}

/// What a node reports about one neighbor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNeighborsTieElement {
    pub level: u8,
    pub cost: u32,
    pub link_ids: BTreeSet<LinkIdPair>,
    pub bandwidth: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub protocol_minor_version: u16,
    pub flood_reduction: Option<bool>,
}

/// Node topology payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTieElement {
    pub level: u8,
    pub neighbors: BTreeMap<SystemId, NodeNeighborsTieElement>,
    pub capabilities: NodeCapabilities,
    pub flags: NodeFlags,
    pub name: Option<String>,
}

impl NodeTieElement {
    pub fn new(level: u8) -> Self {
        NodeTieElement {
            level,
            neighbors: BTreeMap::new(),
            capabilities: NodeCapabilities::default(),
            flags: NodeFlags::empty(),
            name: None,
        }
    }

    pub fn is_overloaded(&self) -> bool {
        self.flags.contains(NodeFlags::OVERLOAD)
    }
}

/// Attributes attached to one advertised prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixAttributes {
    pub metric: u32,
    pub tags: BTreeSet<u64>,
    pub monotonic_clock: Option<PrefixSequence>,
}

impl PrefixAttributes {
    pub fn with_metric(metric: u32) -> Self {
        PrefixAttributes {
            metric,
            tags: BTreeSet::new(),
            monotonic_clock: None,
        }
    }
}

/// Prefix reachability payload, shared by all prefix-carrying TIE types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTieElement {
    pub prefixes: BTreeMap<IpPrefix, PrefixAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueTieElement {
    pub keyvalues: BTreeMap<u32, Vec<u8>>,
}

/// Type-tagged TIE payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieElement {
    Node(NodeTieElement),
    Prefixes(PrefixTieElement),
    PositiveDisaggregationPrefixes(PrefixTieElement),
    NegativeDisaggregationPrefixes(PrefixTieElement),
    PolicyGuidedPrefixes(PrefixTieElement),
    KeyValues(KeyValueTieElement),
    ExternalPrefixes(PrefixTieElement),
}

impl TieElement {
    /// The TIE type this payload belongs to
    pub fn tie_type(&self) -> TieType {
        match self {
            TieElement::Node(_) => TieType::Node,
            TieElement::Prefixes(_) => TieType::Prefix,
            TieElement::PositiveDisaggregationPrefixes(_) => TieType::PositiveDisaggregationPrefix,
            TieElement::NegativeDisaggregationPrefixes(_) => TieType::NegativeDisaggregationPrefix,
            TieElement::PolicyGuidedPrefixes(_) => TieType::PgPrefix,
            TieElement::KeyValues(_) => TieType::KeyValue,
            TieElement::ExternalPrefixes(_) => TieType::ExternalPrefix,
        }
    }

    /// Payload with no content, used to flush a stale TIE.
    ///
    /// Node TIEs keep the level so scope rules still see where the
    /// originator sits.
    pub fn empty(tie_type: TieType, level: u8) -> Self {
        match tie_type {
            TieType::Node => TieElement::Node(NodeTieElement::new(level)),
            TieType::Prefix => TieElement::Prefixes(PrefixTieElement::default()),
            TieType::PositiveDisaggregationPrefix => {
                TieElement::PositiveDisaggregationPrefixes(PrefixTieElement::default())
            }
            TieType::NegativeDisaggregationPrefix => {
                TieElement::NegativeDisaggregationPrefixes(PrefixTieElement::default())
            }
            TieType::PgPrefix => TieElement::PolicyGuidedPrefixes(PrefixTieElement::default()),
            TieType::KeyValue => TieElement::KeyValues(KeyValueTieElement::default()),
            TieType::ExternalPrefix => TieElement::ExternalPrefixes(PrefixTieElement::default()),
        }
    }

    /// Prefix payload, if this is one of the prefix-carrying variants
    pub fn prefixes(&self) -> Option<&PrefixTieElement> {
        match self {
            TieElement::Prefixes(p)
            | TieElement::PositiveDisaggregationPrefixes(p)
            | TieElement::NegativeDisaggregationPrefixes(p)
            | TieElement::PolicyGuidedPrefixes(p)
            | TieElement::ExternalPrefixes(p) => Some(p),
            TieElement::Node(_) | TieElement::KeyValues(_) => None,
        }
    }

    pub fn node(&self) -> Option<&NodeTieElement> {
        match self {
            TieElement::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn validate(&self, config: &FabricConfig) -> Result<()> {
        match self {
            TieElement::Node(node) => {
                check_level(node.level, config)?;
                for (system_id, neighbor) in &node.neighbors {
                    system_id.validate()?;
                    check_level(neighbor.level, config)?;
                }
                Ok(())
            }
            TieElement::KeyValues(_) => Ok(()),
            _ => {
                if let Some(prefixes) = self.prefixes() {
                    for (prefix, attributes) in &prefixes.prefixes {
                        prefix.validate()?;
                        if let Some(sequence) = &attributes.monotonic_clock {
                            sequence.validate()?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_level(level: u8, config: &FabricConfig) -> Result<()> {
    if level > config.top_of_fabric_level {
        return Err(ProtocolError::InvalidLevel {
            level,
            max: config.top_of_fabric_level,
        });
    }
    Ok(())
}

/// Topology Information Element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tie {
    pub header: TieHeader,
    pub element: TieElement,
}

impl Tie {
    /// Build a TIE, rejecting a payload that does not match the header's type
    pub fn new(header: TieHeader, element: TieElement) -> Result<Self> {
        let tie = Tie { header, element };
        tie.check_element_type()?;
        Ok(tie)
    }

    pub fn tie_id(&self) -> &TieId {
        &self.header.tie_id
    }

    fn check_element_type(&self) -> Result<()> {
        if self.element.tie_type() != self.header.tie_id.tie_type {
            return Err(ProtocolError::ElementTypeMismatch {
                expected: self.header.tie_id.tie_type.to_string(),
            });
        }
        Ok(())
    }

    /// Full structural validation of a received TIE
    pub fn validate(&self, config: &FabricConfig) -> Result<()> {
        self.header.validate()?;
        self.check_element_type()?;
        self.element.validate(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, IeeeTimestamp};

    fn tie_id(tie_type: TieType) -> TieId {
        TieId::new(Direction::North, SystemId::new(1).unwrap(), tie_type, 1)
    }

    #[test]
    fn test_element_type_mismatch_rejected() {
        let header = TieHeader::new(tie_id(TieType::Node), 1, 100);
        let result = Tie::new(header, TieElement::Prefixes(PrefixTieElement::default()));
        assert!(matches!(
            result,
            Err(ProtocolError::ElementTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_element_matches_type() {
        for tie_type in [
            TieType::Node,
            TieType::Prefix,
            TieType::PositiveDisaggregationPrefix,
            TieType::NegativeDisaggregationPrefix,
            TieType::PgPrefix,
            TieType::KeyValue,
            TieType::ExternalPrefix,
        ] {
            assert_eq!(TieElement::empty(tie_type, 0).tie_type(), tie_type);
        }
    }

    #[test]
    fn test_node_level_validated() {
        let config = FabricConfig::default();
        let header = TieHeader::new(tie_id(TieType::Node), 1, 100);
        let tie = Tie::new(header, TieElement::Node(NodeTieElement::new(25))).unwrap();
        assert!(matches!(
            tie.validate(&config),
            Err(ProtocolError::InvalidLevel { level: 25, max: 24 })
        ));
    }

    #[test]
    fn test_prefix_sequence_validated() {
        let config = FabricConfig::default();
        let mut prefixes = PrefixTieElement::default();
        let mut attributes = PrefixAttributes::with_metric(1);
        attributes.monotonic_clock = Some(PrefixSequence::new(
            IeeeTimestamp::new(1, Some(2_000_000_000)),
            None,
        ));
        prefixes
            .prefixes
            .insert("10.0.0.0/8".parse().unwrap(), attributes);

        let header = TieHeader::new(tie_id(TieType::Prefix), 1, 100);
        let tie = Tie::new(header, TieElement::Prefixes(prefixes)).unwrap();
        assert!(matches!(
            tie.validate(&config),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_overload_flag() {
        let mut node = NodeTieElement::new(1);
        assert!(!node.is_overloaded());
        node.flags.insert(NodeFlags::OVERLOAD);
        assert!(node.is_overloaded());
    }
}
