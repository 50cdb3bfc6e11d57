//! Core protocol types

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ProtocolError, Result};

/// Reserved system ID value that never names a real node
pub const ILLEGAL_SYSTEM_ID: u64 = 0;

/// Nanoseconds per second, exclusive upper bound of `IeeeTimestamp::as_nsec`
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A unique identifier for a node in the fabric
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SystemId(u64);

impl SystemId {
    /// Lowest possible value, only used to bound TIEID ranges
    pub const MIN: SystemId = SystemId(0);

    /// Highest possible value
    pub const MAX: SystemId = SystemId(u64::MAX);

    /// Create a SystemId, rejecting the reserved value 0
    pub fn new(value: u64) -> Result<Self> {
        if value == ILLEGAL_SYSTEM_ID {
            return Err(ProtocolError::IllegalSystemId);
        }
        Ok(SystemId(value))
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the reserved value received off the wire
    pub fn is_illegal(&self) -> bool {
        self.0 == ILLEGAL_SYSTEM_ID
    }

    /// Fails with `IllegalSystemId` if this is the reserved value
    pub fn validate(&self) -> Result<()> {
        if self.is_illegal() {
            Err(ProtocolError::IllegalSystemId)
        } else {
            Ok(())
        }
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

impl TryFrom<u64> for SystemId {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self> {
        SystemId::new(value)
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.to_hex())
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Direction a TIE is flooded towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    South = 1,
    North = 2,
}

impl Direction {
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::South => Direction::North,
            Direction::North => Direction::South,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::South => write!(f, "South"),
            Direction::North => write!(f, "North"),
        }
    }
}

/// Where a neighbor sits relative to this node, derived from levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborDirection {
    South,
    North,
    EastWest,
}

impl NeighborDirection {
    /// Direction of a neighbor at `neighbor_level` as seen from a node at `my_level`
    pub fn from_levels(my_level: u8, neighbor_level: u8) -> Self {
        use std::cmp::Ordering;
        match neighbor_level.cmp(&my_level) {
            Ordering::Greater => NeighborDirection::North,
            Ordering::Less => NeighborDirection::South,
            Ordering::Equal => NeighborDirection::EastWest,
        }
    }

    /// The same link seen from the other end
    pub fn reverse(&self) -> Self {
        match self {
            NeighborDirection::South => NeighborDirection::North,
            NeighborDirection::North => NeighborDirection::South,
            NeighborDirection::EastWest => NeighborDirection::EastWest,
        }
    }
}

/// TIE type, discriminating the payload a TIE carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TieType {
    Node = 2,
    Prefix = 3,
    PositiveDisaggregationPrefix = 4,
    NegativeDisaggregationPrefix = 5,
    PgPrefix = 6,
    KeyValue = 7,
    ExternalPrefix = 8,
}

impl TieType {
    pub fn name(&self) -> &'static str {
        match self {
            TieType::Node => "Node",
            TieType::Prefix => "Prefix",
            TieType::PositiveDisaggregationPrefix => "PositiveDisaggregationPrefix",
            TieType::NegativeDisaggregationPrefix => "NegativeDisaggregationPrefix",
            TieType::PgPrefix => "PGPrefix",
            TieType::KeyValue => "KeyValue",
            TieType::ExternalPrefix => "ExternalPrefix",
        }
    }
}

impl fmt::Display for TieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Key of one topology element in the database.
///
/// Ordering is lexicographic over (direction, originator, type, number),
/// which is the order summaries enumerate TIEs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TieId {
    pub direction: Direction,
    pub originator: SystemId,
    pub tie_type: TieType,
    pub tie_nr: u32,
}

impl TieId {
    /// Lower bound of the TIEID space
    pub const MIN: TieId = TieId {
        direction: Direction::South,
        originator: SystemId::MIN,
        tie_type: TieType::Node,
        tie_nr: 0,
    };

    /// Upper bound of the TIEID space
    pub const MAX: TieId = TieId {
        direction: Direction::North,
        originator: SystemId::MAX,
        tie_type: TieType::ExternalPrefix,
        tie_nr: u32::MAX,
    };

    pub fn new(direction: Direction, originator: SystemId, tie_type: TieType, tie_nr: u32) -> Self {
        TieId {
            direction,
            originator,
            tie_type,
            tie_nr,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.originator.validate()
    }
}

impl fmt::Display for TieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.direction, self.originator, self.tie_type, self.tie_nr
        )
    }
}

/// IEEE 802.1AS timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IeeeTimestamp {
    pub as_sec: u64,
    pub as_nsec: Option<u32>,
}

impl IeeeTimestamp {
    pub fn new(as_sec: u64, as_nsec: Option<u32>) -> Self {
        IeeeTimestamp { as_sec, as_nsec }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let now = Utc::now();
        IeeeTimestamp {
            as_sec: now.timestamp().max(0) as u64,
            as_nsec: Some(now.timestamp_subsec_nanos()),
        }
    }

    /// Total nanoseconds since the epoch
    pub fn as_nanos(&self) -> u128 {
        self.as_sec as u128 * NANOS_PER_SEC as u128 + self.as_nsec.unwrap_or(0) as u128
    }

    pub fn validate(&self) -> Result<()> {
        match self.as_nsec {
            Some(nsec) if nsec >= NANOS_PER_SEC => Err(ProtocolError::MalformedPayload(format!(
                "timestamp nanoseconds out of range: {}",
                nsec
            ))),
            _ => Ok(()),
        }
    }
}

/// Ordering information attached to a prefix to sequence mobility events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrefixSequence {
    pub timestamp: IeeeTimestamp,
    pub transaction_id: Option<u8>,
}

impl PrefixSequence {
    pub fn new(timestamp: IeeeTimestamp, transaction_id: Option<u8>) -> Self {
        PrefixSequence {
            timestamp,
            transaction_id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.timestamp.validate()
    }
}

/// Header of a TIE: identity plus version information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TieHeader {
    pub tie_id: TieId,
    pub seq_nr: u32,
    pub remaining_lifetime: u32,
    pub origination_time: Option<IeeeTimestamp>,
    pub origination_lifetime: Option<u32>,
}

impl TieHeader {
    pub fn new(tie_id: TieId, seq_nr: u32, remaining_lifetime: u32) -> Self {
        TieHeader {
            tie_id,
            seq_nr,
            remaining_lifetime,
            origination_time: None,
            origination_lifetime: None,
        }
    }

    /// Header used to request a TIE we hold no copy of; any held copy is newer
    pub fn unknown(tie_id: TieId) -> Self {
        TieHeader::new(tie_id, 0, 0)
    }

    pub fn validate(&self) -> Result<()> {
        self.tie_id.validate()?;
        if let Some(timestamp) = &self.origination_time {
            timestamp.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for TieHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} lifetime={}",
            self.tie_id, self.seq_nr, self.remaining_lifetime
        )
    }
}
