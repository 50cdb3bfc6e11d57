//! TIEs originated by this node
//!
//! The node owns a North and a South Node TIE listing its adjacencies, a
//! North Prefix TIE for the configured prefixes, and a South Prefix TIE
//! carrying default routes while it has neighbors at or below its level.

use anyhow::{Context, Result};
use rift_flooding::LinkInfo;
use rift_protocol::{
    Direction, IpPrefix, LinkIdPair, NeighborDirection, NodeFlags, NodeNeighborsTieElement,
    NodeTieElement, PrefixAttributes, PrefixTieElement, SystemId, TieElement, TieId, TieType,
};
use rift_tiedb::{SharedTieDb, TieDatabase};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{NodeConfig, PrefixConfig};

/// TIE number used for every self-originated TIE
const OWN_TIE_NR: u32 = 1;

/// Cost advertised for every adjacency
const NEIGHBOR_COST: u32 = 1;

/// Bandwidth advertised for every adjacency
const NEIGHBOR_BANDWIDTH: u32 = 100;

/// Metric of the default routes advertised south
const DEFAULT_ROUTE_METRIC: u32 = 1;

/// Builds the node's own TIEs and re-originates them when they change
pub struct OwnTies {
    db: SharedTieDb,
    system_id: SystemId,
    name: String,
    level: u8,
    overload: bool,
    prefixes: Vec<PrefixConfig>,
}

impl OwnTies {
    pub fn new(db: SharedTieDb, node: &NodeConfig, prefixes: &[PrefixConfig]) -> Self {
        OwnTies {
            db,
            system_id: node.system_id,
            name: node.name.clone(),
            level: node.level,
            overload: node.overload,
            prefixes: prefixes.to_vec(),
        }
    }

    fn tie_id(&self, direction: Direction, tie_type: TieType) -> TieId {
        TieId::new(direction, self.system_id, tie_type, OWN_TIE_NR)
    }

    /// Originate every own TIE for the given adjacencies
    pub async fn originate_all(&self, links: &[LinkInfo]) -> Result<()> {
        let mut db = self.db.write().await;
        self.originate_node_ties(&mut db, links)?;

        if !self.prefixes.is_empty() {
            let mut element = PrefixTieElement::default();
            for entry in &self.prefixes {
                element
                    .prefixes
                    .insert(entry.prefix.clone(), PrefixAttributes::with_metric(entry.metric));
            }
            let tie_id = self.tie_id(Direction::North, TieType::Prefix);
            let tie = db
                .originate(tie_id, TieElement::Prefixes(element))
                .with_context(|| format!("Failed to originate {}", tie_id))?;
            debug!("Originated {}", tie.header);
        }

        self.regenerate_south_prefix_tie(&mut db, links)?;

        let own = db
            .snapshot(None)
            .filter(|header| header.tie_id.originator == self.system_id)
            .count();
        info!("✓ Originated {} own TIE(s)", own);
        Ok(())
    }

    /// Follow a change of adjacencies: Node TIEs and the default route
    pub async fn regenerate(&self, links: &[LinkInfo]) -> Result<()> {
        let mut db = self.db.write().await;
        self.regenerate_node_ties(&mut db, links)?;
        self.regenerate_south_prefix_tie(&mut db, links)
    }

    /// Node payload listing one entry per neighbor with all its parallel links
    pub fn node_element(&self, links: &[LinkInfo]) -> NodeTieElement {
        let mut neighbors: BTreeMap<SystemId, NodeNeighborsTieElement> = BTreeMap::new();
        for link in links {
            let neighbor = neighbors
                .entry(link.neighbor)
                .or_insert_with(|| NodeNeighborsTieElement {
                    level: link.neighbor_level,
                    cost: NEIGHBOR_COST,
                    link_ids: Default::default(),
                    bandwidth: Some(NEIGHBOR_BANDWIDTH),
                });
            neighbor.link_ids.insert(LinkIdPair {
                local_id: link.link_id.0,
                remote_id: link.remote_link_id.unwrap_or(0),
            });
        }

        let mut element = NodeTieElement::new(self.level);
        element.neighbors = neighbors;
        element.name = Some(self.name.clone());
        if self.overload {
            element.flags.insert(NodeFlags::OVERLOAD);
        }
        element
    }

    fn originate_node_ties(&self, db: &mut TieDatabase, links: &[LinkInfo]) -> Result<()> {
        let element = self.node_element(links);
        for direction in [Direction::North, Direction::South] {
            let tie_id = self.tie_id(direction, TieType::Node);
            let tie = db
                .originate(tie_id, TieElement::Node(element.clone()))
                .with_context(|| format!("Failed to originate {}", tie_id))?;
            debug!("Originated {}", tie.header);
        }
        Ok(())
    }

    /// Re-originate the Node TIEs only when their neighbor set changed
    fn regenerate_node_ties(&self, db: &mut TieDatabase, links: &[LinkInfo]) -> Result<()> {
        let element = TieElement::Node(self.node_element(links));
        for direction in [Direction::North, Direction::South] {
            let tie_id = self.tie_id(direction, TieType::Node);
            let unchanged = db.get(&tie_id).map_or(false, |tie| tie.element == element);
            if unchanged {
                continue;
            }
            let tie = db
                .originate(tie_id, element.clone())
                .with_context(|| format!("Failed to regenerate {}", tie_id))?;
            info!("Regenerated {} for {} link(s)", tie.header, links.len());
        }
        Ok(())
    }

    /// Default routes go south while we have a south or east-west neighbor
    /// and do not advertise overload
    fn default_route_needed(&self, db: &TieDatabase, links: &[LinkInfo]) -> bool {
        let overloaded = db
            .get(&self.tie_id(Direction::North, TieType::Node))
            .ok()
            .and_then(|tie| tie.element.node())
            .map_or(false, NodeTieElement::is_overloaded);
        if overloaded {
            return false;
        }
        links
            .iter()
            .any(|link| link.direction(self.level) != NeighborDirection::North)
    }

    /// Originate the default routes, or flush them with an empty payload
    /// once they are no longer needed
    fn regenerate_south_prefix_tie(&self, db: &mut TieDatabase, links: &[LinkInfo]) -> Result<()> {
        let tie_id = self.tie_id(Direction::South, TieType::Prefix);
        let needed = self.default_route_needed(db, links);
        let advertised = db
            .get(&tie_id)
            .ok()
            .and_then(|tie| tie.element.prefixes())
            .map_or(false, |element| !element.prefixes.is_empty());
        if needed == advertised {
            return Ok(());
        }
        if !needed && !db.contains(&tie_id) {
            return Ok(());
        }

        let mut element = PrefixTieElement::default();
        if needed {
            for prefix in [IpPrefix::default_v4(), IpPrefix::default_v6()] {
                element
                    .prefixes
                    .insert(prefix, PrefixAttributes::with_metric(DEFAULT_ROUTE_METRIC));
            }
        }
        let tie = db
            .originate(tie_id, TieElement::Prefixes(element))
            .with_context(|| format!("Failed to originate {}", tie_id))?;
        if needed {
            info!("Originating default routes south in {}", tie.header);
        } else {
            info!("Flushed default routes with {}", tie.header);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_flooding::LinkId;
    use rift_protocol::FabricConfig;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn sid(value: u64) -> SystemId {
        SystemId::new(value).unwrap()
    }

    fn own_ties(level: u8, overload: bool) -> OwnTies {
        let db = TieDatabase::new(sid(1), level, Arc::new(FabricConfig::default())).unwrap();
        let node = NodeConfig {
            system_id: sid(1),
            name: "node-1".to_string(),
            level,
            overload,
        };
        OwnTies::new(Arc::new(RwLock::new(db)), &node, &[])
    }

    fn node_tie(db: &TieDatabase, direction: Direction) -> (u32, NodeTieElement) {
        let tie = db
            .get(&TieId::new(direction, sid(1), TieType::Node, OWN_TIE_NR))
            .unwrap();
        (tie.header.seq_nr, tie.element.node().unwrap().clone())
    }

    fn south_prefixes(db: &TieDatabase) -> Option<usize> {
        db.get(&TieId::new(Direction::South, sid(1), TieType::Prefix, OWN_TIE_NR))
            .ok()
            .map(|tie| tie.element.prefixes().unwrap().prefixes.len())
    }

    #[test]
    fn test_node_element_groups_parallel_links() {
        let ties = own_ties(1, false);
        let links = vec![
            LinkInfo::new(LinkId(1), sid(7), 2).with_remote_link_id(11),
            LinkInfo::new(LinkId(2), sid(7), 2).with_remote_link_id(12),
            LinkInfo::new(LinkId(3), sid(8), 0),
        ];

        let element = ties.node_element(&links);
        assert_eq!(element.level, 1);
        assert_eq!(element.name.as_deref(), Some("node-1"));
        assert_eq!(element.neighbors.len(), 2);

        let spine = &element.neighbors[&sid(7)];
        assert_eq!(spine.level, 2);
        assert_eq!(spine.cost, 1);
        assert_eq!(spine.bandwidth, Some(100));
        let pairs: Vec<LinkIdPair> = spine.link_ids.iter().copied().collect();
        assert_eq!(
            pairs,
            vec![
                LinkIdPair { local_id: 1, remote_id: 11 },
                LinkIdPair { local_id: 2, remote_id: 12 },
            ]
        );
        assert_eq!(element.neighbors[&sid(8)].link_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_link_changes_regenerate_node_ties() {
        let ties = own_ties(1, false);
        ties.originate_all(&[]).await.unwrap();

        let links = vec![LinkInfo::new(LinkId(1), sid(7), 2)];
        ties.regenerate(&links).await.unwrap();
        {
            let db = ties.db.read().await;
            for direction in [Direction::North, Direction::South] {
                let (seq_nr, element) = node_tie(&db, direction);
                assert_eq!(seq_nr, 2);
                assert!(element.neighbors.contains_key(&sid(7)));
            }
        }

        // Same adjacencies: nothing to re-originate
        ties.regenerate(&links).await.unwrap();
        assert_eq!(node_tie(&*ties.db.read().await, Direction::North).0, 2);

        ties.regenerate(&[]).await.unwrap();
        let (seq_nr, element) = node_tie(&*ties.db.read().await, Direction::North);
        assert_eq!(seq_nr, 3);
        assert!(element.neighbors.is_empty());
    }

    #[tokio::test]
    async fn test_default_routes_follow_south_adjacency() {
        let ties = own_ties(1, false);
        let north_only = vec![LinkInfo::new(LinkId(1), sid(7), 2)];
        ties.originate_all(&north_only).await.unwrap();
        assert_eq!(south_prefixes(&*ties.db.read().await), None);

        let with_leaf = vec![
            LinkInfo::new(LinkId(1), sid(7), 2),
            LinkInfo::new(LinkId(2), sid(8), 0),
        ];
        ties.regenerate(&with_leaf).await.unwrap();
        {
            let db = ties.db.read().await;
            let tie = db
                .get(&TieId::new(Direction::South, sid(1), TieType::Prefix, OWN_TIE_NR))
                .unwrap();
            let prefixes = &tie.element.prefixes().unwrap().prefixes;
            assert_eq!(prefixes.len(), 2);
            assert_eq!(prefixes[&IpPrefix::default_v4()].metric, 1);
            assert_eq!(prefixes[&IpPrefix::default_v6()].metric, 1);
        }

        // The leaf goes away: the default routes are flushed, not dropped
        ties.regenerate(&north_only).await.unwrap();
        assert_eq!(south_prefixes(&*ties.db.read().await), Some(0));
    }

    #[tokio::test]
    async fn test_east_west_neighbor_gets_default_routes() {
        let ties = own_ties(1, false);
        ties.originate_all(&[LinkInfo::new(LinkId(1), sid(9), 1)])
            .await
            .unwrap();
        assert_eq!(south_prefixes(&*ties.db.read().await), Some(2));
    }

    #[tokio::test]
    async fn test_overloaded_node_advertises_no_default() {
        let ties = own_ties(1, true);
        ties.originate_all(&[LinkInfo::new(LinkId(1), sid(8), 0)])
            .await
            .unwrap();

        let db = ties.db.read().await;
        assert!(node_tie(&db, Direction::North).1.is_overloaded());
        assert_eq!(south_prefixes(&db), None);
    }
}
