//! Flooding scope rules
//!
//! Decide whether a TIE may be flooded from one node to an adjacent one,
//! based on the TIE's direction and type, where the receiver sits relative
//! to the sender, and (for Node South TIEs) the originator's level as found
//! in the local database.

use rift_protocol::{Direction, FabricConfig, NeighborDirection, SystemId, TieHeader, TieType};
use rift_tiedb::TieDatabase;

use crate::link::LinkInfo;

/// One end of an adjacency as seen by the scope rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub system_id: SystemId,
    pub level: u8,
    pub top_of_fabric: bool,
}

impl Endpoint {
    pub fn new(system_id: SystemId, level: u8, config: &FabricConfig) -> Self {
        Endpoint {
            system_id,
            level,
            top_of_fabric: config.is_top_of_fabric(level),
        }
    }

    /// The node owning `db`
    pub fn local(db: &TieDatabase) -> Self {
        Endpoint::new(db.system_id(), db.level(), db.config())
    }

    /// The neighbor on `link`
    pub fn neighbor(link: &LinkInfo, config: &FabricConfig) -> Self {
        Endpoint::new(link.neighbor, link.neighbor_level, config)
    }
}

/// Outcome of a scope check, with the rule that decided it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeDecision {
    pub allowed: bool,
    pub rule: &'static str,
}

impl ScopeDecision {
    fn allow(rule: &'static str) -> Self {
        ScopeDecision {
            allowed: true,
            rule,
        }
    }

    fn deny(rule: &'static str) -> Self {
        ScopeDecision {
            allowed: false,
            rule,
        }
    }
}

/// May `header` be flooded from `from` to the adjacent node `to`?
///
/// Node South TIEs need the originator's level. When the database does not
/// hold the originator's Node TIE yet the flood is allowed, so a new
/// originator is not starved until its level becomes known.
pub fn is_flood_allowed(
    db: &TieDatabase,
    header: &TieHeader,
    from: &Endpoint,
    to: &Endpoint,
) -> ScopeDecision {
    let tie_id = &header.tie_id;
    let to_direction = NeighborDirection::from_levels(from.level, to.level);

    match (tie_id.direction, tie_id.tie_type) {
        (Direction::North, _) => match to_direction {
            NeighborDirection::South => ScopeDecision::deny("N-TIE to S: never flood"),
            NeighborDirection::North => ScopeDecision::allow("N-TIE to N: always flood"),
            NeighborDirection::EastWest if from.top_of_fabric => {
                ScopeDecision::allow("N-TIE to EW: top of fabric")
            }
            NeighborDirection::EastWest => ScopeDecision::deny("N-TIE to EW: not top of fabric"),
        },
        (Direction::South, TieType::Node) => {
            let originator_level = db.node_level(tie_id);
            match to_direction {
                NeighborDirection::South => match originator_level {
                    None => ScopeDecision::allow("Node S-TIE to S: originator level unknown"),
                    Some(level) if level == from.level => {
                        ScopeDecision::allow("Node S-TIE to S: originator at sender level")
                    }
                    Some(_) => ScopeDecision::deny("Node S-TIE to S: originator not at sender level"),
                },
                NeighborDirection::North => match originator_level {
                    None => ScopeDecision::allow("Node S-TIE to N: originator level unknown"),
                    Some(level) if level > from.level => {
                        ScopeDecision::allow("Node S-TIE to N: originator above sender")
                    }
                    Some(_) => ScopeDecision::deny("Node S-TIE to N: originator not above sender"),
                },
                NeighborDirection::EastWest if from.top_of_fabric => {
                    ScopeDecision::deny("Node S-TIE to EW: sender is top of fabric")
                }
                NeighborDirection::EastWest => {
                    ScopeDecision::allow("Node S-TIE to EW: sender not top of fabric")
                }
            }
        }
        (Direction::South, _) => {
            let self_originated = tie_id.originator == from.system_id;
            match to_direction {
                NeighborDirection::South if self_originated => {
                    ScopeDecision::allow("Non-node S-TIE to S: self-originated")
                }
                NeighborDirection::South => {
                    ScopeDecision::deny("Non-node S-TIE to S: not self-originated")
                }
                NeighborDirection::North if tie_id.originator == to.system_id => {
                    ScopeDecision::allow("Non-node S-TIE to N: receiver is originator")
                }
                NeighborDirection::North => {
                    ScopeDecision::deny("Non-node S-TIE to N: receiver is not originator")
                }
                NeighborDirection::EastWest if from.top_of_fabric => {
                    ScopeDecision::deny("Non-node S-TIE to EW: sender is top of fabric")
                }
                NeighborDirection::EastWest if self_originated => {
                    ScopeDecision::allow("Non-node S-TIE to EW: self-originated")
                }
                NeighborDirection::EastWest => {
                    ScopeDecision::deny("Non-node S-TIE to EW: not self-originated")
                }
            }
        }
    }
}

/// May we flood `header` to the neighbor on `link`?
pub fn flood_allowed_to_neighbor(db: &TieDatabase, link: &LinkInfo, header: &TieHeader) -> ScopeDecision {
    let local = Endpoint::local(db);
    let neighbor = Endpoint::neighbor(link, db.config());
    is_flood_allowed(db, header, &local, &neighbor)
}

/// May the neighbor on `link` flood `header` to us?
///
/// We only request what the neighbor is allowed to send, otherwise extra
/// headers in its summaries would make the two ends oscillate.
pub fn flood_allowed_from_neighbor(
    db: &TieDatabase,
    link: &LinkInfo,
    header: &TieHeader,
) -> ScopeDecision {
    let local = Endpoint::local(db);
    let neighbor = Endpoint::neighbor(link, db.config());
    is_flood_allowed(db, header, &neighbor, &local)
}
