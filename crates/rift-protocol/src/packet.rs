//! Flooding packets and their binary codec
//!
//! Three contents travel on a flooding adjacency:
//! - `Tide`: summary of the TIE headers a node holds, sorted by TIEID
//! - `Tire`: headers a node requests, or acknowledges
//! - `Tie`: a full topology element

use bincode::Options;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FabricConfig;
use crate::element::Tie;
use crate::error::{ProtocolError, Result};
use crate::types::{SystemId, TieHeader, TieId};

/// Major protocol version; packets with another major are dropped
pub const PROTOCOL_MAJOR_VERSION: u8 = 1;

/// Minor protocol version
pub const PROTOCOL_MINOR_VERSION: u16 = 0;

/// Largest encoded packet accepted or produced (one UDP datagram)
pub const MAX_PACKET_SIZE: usize = 65_507;

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_PACKET_SIZE as u64)
}

/// Summary of held TIE headers over `[start_range, end_range]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tide {
    pub start_range: TieId,
    pub end_range: TieId,
    pub headers: Vec<TieHeader>,
}

impl Tide {
    /// A summary covering the whole TIEID space
    pub fn full_range(headers: Vec<TieHeader>) -> Self {
        Tide {
            start_range: TieId::MIN,
            end_range: TieId::MAX,
            headers,
        }
    }

    /// Checks the range and that headers are strictly ascending inside it
    pub fn validate(&self) -> Result<()> {
        if self.start_range > self.end_range {
            return Err(ProtocolError::MalformedPayload(
                "TIDE start range after end range".to_string(),
            ));
        }
        let mut previous: Option<&TieId> = None;
        for header in &self.headers {
            header.validate()?;
            let tie_id = &header.tie_id;
            if *tie_id < self.start_range || *tie_id > self.end_range {
                return Err(ProtocolError::MalformedPayload(format!(
                    "TIDE header {} outside advertised range",
                    tie_id
                )));
            }
            if let Some(prev) = previous {
                if tie_id <= prev {
                    return Err(ProtocolError::MalformedPayload(format!(
                        "TIDE headers out of order at {}",
                        tie_id
                    )));
                }
            }
            previous = Some(tie_id);
        }
        Ok(())
    }
}

/// Requested or acknowledged TIE headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tire {
    pub headers: Vec<TieHeader>,
}

impl Tire {
    pub fn validate(&self) -> Result<()> {
        self.headers.iter().try_for_each(TieHeader::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketContent {
    Tide(Tide),
    Tire(Tire),
    Tie(Tie),
}

impl PacketContent {
    pub fn kind(&self) -> &'static str {
        match self {
            PacketContent::Tide(_) => "TIDE",
            PacketContent::Tire(_) => "TIRE",
            PacketContent::Tie(_) => "TIE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub major_version: u8,
    pub minor_version: u16,
    pub sender: SystemId,
    pub level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPacket {
    pub header: PacketHeader,
    pub content: PacketContent,
}

impl ProtocolPacket {
    pub fn new(sender: SystemId, level: Option<u8>, content: PacketContent) -> Self {
        ProtocolPacket {
            header: PacketHeader {
                major_version: PROTOCOL_MAJOR_VERSION,
                minor_version: PROTOCOL_MINOR_VERSION,
                sender,
                level,
            },
            content,
        }
    }

    /// Serialize for transmission
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec().serialize(self).map_err(|e| {
            warn!("Failed to encode {} packet: {}", self.content.kind(), e);
            ProtocolError::SerializationFailed(e.to_string())
        })
    }

    /// Decode and validate a received packet.
    ///
    /// Any failure is `MalformedPayload` (or a more specific validation
    /// error) and concerns this packet only.
    pub fn decode(bytes: &[u8], config: &FabricConfig) -> Result<Self> {
        let packet: ProtocolPacket = codec().deserialize(bytes).map_err(|e| {
            debug!("Undecodable packet ({} bytes): {}", bytes.len(), e);
            ProtocolError::MalformedPayload(e.to_string())
        })?;
        if let Err(e) = packet.validate(config) {
            debug!(
                "Rejected {} packet from {}: {}",
                packet.content.kind(),
                packet.header.sender,
                e
            );
            return Err(e);
        }
        Ok(packet)
    }

    pub fn validate(&self, config: &FabricConfig) -> Result<()> {
        if self.header.major_version != PROTOCOL_MAJOR_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                major: self.header.major_version,
                minor: self.header.minor_version,
            });
        }
        self.header.sender.validate()?;
        if let Some(level) = self.header.level {
            if level > config.top_of_fabric_level {
                return Err(ProtocolError::InvalidLevel {
                    level,
                    max: config.top_of_fabric_level,
                });
            }
        }
        match &self.content {
            PacketContent::Tide(tide) => tide.validate(),
            PacketContent::Tire(tire) => tire.validate(),
            PacketContent::Tie(tie) => tie.validate(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{KeyValueTieElement, NodeTieElement, TieElement};
    use crate::types::{Direction, TieType};

    fn sid(value: u64) -> SystemId {
        SystemId::new(value).unwrap()
    }

    fn header(originator: u64, tie_nr: u32) -> TieHeader {
        let tie_id = TieId::new(Direction::South, sid(originator), TieType::Node, tie_nr);
        TieHeader::new(tie_id, 1, 1000)
    }

    fn node_tie() -> Tie {
        Tie::new(
            header(3, 1),
            TieElement::Node(NodeTieElement::new(2)),
        )
        .unwrap()
    }

    #[test]
    fn test_tie_packet_survives_codec() {
        let config = FabricConfig::default();
        let packet = ProtocolPacket::new(sid(3), Some(2), PacketContent::Tie(node_tie()));
        let bytes = packet.encode().unwrap();
        assert_eq!(ProtocolPacket::decode(&bytes, &config).unwrap(), packet);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let config = FabricConfig::default();
        let result = ProtocolPacket::decode(&[0xff, 0x00, 0x13], &config);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let config = FabricConfig::default();
        let packet = ProtocolPacket::new(sid(3), None, PacketContent::Tire(Tire::default()));
        let mut bytes = packet.encode().unwrap();
        bytes.push(0);
        assert!(ProtocolPacket::decode(&bytes, &config).is_err());
    }

    #[test]
    fn test_illegal_sender_rejected() {
        let config = FabricConfig::default();
        let packet = ProtocolPacket::new(SystemId::MIN, None, PacketContent::Tire(Tire::default()));
        let bytes = packet.encode().unwrap();
        assert_eq!(
            ProtocolPacket::decode(&bytes, &config),
            Err(ProtocolError::IllegalSystemId)
        );
    }

    #[test]
    fn test_wrong_major_version_rejected() {
        let config = FabricConfig::default();
        let mut packet = ProtocolPacket::new(sid(3), None, PacketContent::Tire(Tire::default()));
        packet.header.major_version = PROTOCOL_MAJOR_VERSION + 1;
        let bytes = packet.encode().unwrap();
        assert!(matches!(
            ProtocolPacket::decode(&bytes, &config),
            Err(ProtocolError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_oversized_packet_not_encoded() {
        let tie_id = TieId::new(Direction::South, sid(3), TieType::KeyValue, 1);
        let mut element = KeyValueTieElement::default();
        element.keyvalues.insert(1, vec![0xab; MAX_PACKET_SIZE]);
        let tie = Tie::new(TieHeader::new(tie_id, 1, 1000), TieElement::KeyValues(element)).unwrap();

        let packet = ProtocolPacket::new(sid(3), Some(2), PacketContent::Tie(tie));
        assert!(matches!(
            packet.encode(),
            Err(ProtocolError::SerializationFailed(_))
        ));
    }

    #[test]
    fn test_tide_ordering_enforced() {
        let tide = Tide::full_range(vec![header(5, 1), header(4, 1)]);
        assert!(matches!(
            tide.validate(),
            Err(ProtocolError::MalformedPayload(_))
        ));

        let duplicate = Tide::full_range(vec![header(4, 1), header(4, 1)]);
        assert!(duplicate.validate().is_err());

        let sorted = Tide::full_range(vec![header(4, 1), header(4, 2), header(5, 1)]);
        assert!(sorted.validate().is_ok());
    }

    #[test]
    fn test_tide_range_enforced() {
        let tide = Tide {
            start_range: header(5, 1).tie_id,
            end_range: header(6, 1).tie_id,
            headers: vec![header(4, 1)],
        };
        assert!(tide.validate().is_err());
    }

    #[test]
    fn test_mismatched_tie_payload_rejected_on_decode() {
        let config = FabricConfig::default();
        let tie = Tie {
            header: header(3, 1),
            element: TieElement::KeyValues(Default::default()),
        };
        let packet = ProtocolPacket::new(sid(3), None, PacketContent::Tie(tie));
        let bytes = packet.encode().unwrap();
        assert!(ProtocolPacket::decode(&bytes, &config)
            .unwrap_err()
            .is_malformed());
    }
}
