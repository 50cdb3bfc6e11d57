//! Protocol constants and the injectable fabric configuration

use serde::{Deserialize, Serialize};

/// Default TIE lifetime in seconds (1 week)
pub const DEFAULT_LIFETIME: u32 = 604_800;

/// Lifetime of the empty TIE originated to flush a stale copy of an own TIE
pub const FLUSH_LIFETIME: u32 = 60;

/// Lifetime difference below which two otherwise equal headers are the same age
pub const LIFETIME_DIFF2IGNORE: u32 = 300;

/// Default LIE exchange port
pub const DEFAULT_LIE_UDP_PORT: u16 = 911;

/// Default TIE flooding port
pub const DEFAULT_TIE_UDP_FLOOD_PORT: u16 = 912;

/// Default link MTU
pub const DEFAULT_MTU_SIZE: u32 = 1400;

/// Level of the top of the fabric
pub const TOP_OF_FABRIC_LEVEL: u8 = 24;

/// Metric marking a destination unreachable
pub const INFINITE_DISTANCE: u32 = 0x7FFF_FFFF;

/// Metric that must never be selected
pub const INVALID_DISTANCE: u32 = 0;

/// Window within which prefix sequences are ordered by transaction id
pub const PREFIX_SEQUENCE_WINDOW_MS: u64 = 200;

/// Flood reduction is on unless configured otherwise
pub const FLOOD_REDUCTION_DEFAULT: bool = true;

/// Immutable protocol configuration shared by the database and the reconcilers.
///
/// `Default` yields the values every implementation must agree on; tests
/// construct non-default instances to shrink lifetimes and thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub default_lifetime: u32,
    pub flush_lifetime: u32,
    pub lifetime_diff2ignore: u32,
    pub default_lie_udp_port: u16,
    pub default_tie_udp_flood_port: u16,
    pub default_mtu_size: u32,
    pub top_of_fabric_level: u8,
    pub infinite_distance: u32,
    pub invalid_distance: u32,
    pub prefix_sequence_window_ms: u64,
    pub flood_reduction: bool,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            default_lifetime: DEFAULT_LIFETIME,
            flush_lifetime: FLUSH_LIFETIME,
            lifetime_diff2ignore: LIFETIME_DIFF2IGNORE,
            default_lie_udp_port: DEFAULT_LIE_UDP_PORT,
            default_tie_udp_flood_port: DEFAULT_TIE_UDP_FLOOD_PORT,
            default_mtu_size: DEFAULT_MTU_SIZE,
            top_of_fabric_level: TOP_OF_FABRIC_LEVEL,
            infinite_distance: INFINITE_DISTANCE,
            invalid_distance: INVALID_DISTANCE,
            prefix_sequence_window_ms: PREFIX_SEQUENCE_WINDOW_MS,
            flood_reduction: FLOOD_REDUCTION_DEFAULT,
        }
    }
}

impl FabricConfig {
    /// Clamp a received lifetime into `[0, default_lifetime]`
    pub fn clamp_lifetime(&self, lifetime: u32) -> u32 {
        lifetime.min(self.default_lifetime)
    }

    /// Lifetime given to flush TIEs, never above the default lifetime
    pub fn flush_lifetime(&self) -> u32 {
        self.clamp_lifetime(self.flush_lifetime)
    }

    /// Own TIEs at or below this remaining lifetime are re-originated
    pub fn refresh_threshold(&self) -> u32 {
        self.default_lifetime / 2
    }

    /// Whether a node at `level` is the top of the fabric
    pub fn is_top_of_fabric(&self, level: u8) -> bool {
        level == self.top_of_fabric_level
    }
}
