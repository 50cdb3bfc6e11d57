//! Multi-link flooding engine

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rift_tiedb::SharedTieDb;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{FloodingError, Result};
use crate::flooder::{FlooderConfig, LinkFlooder, LinkHandle};
use crate::link::{LinkId, LinkInfo};
use crate::policy::{FloodEverywhere, FloodRepeaterPolicy};
use crate::reconciler::LinkStats;

/// Runs one `LinkFlooder` per adjacency over a shared TIE database.
///
/// Links only interact through the database; each one converges with its
/// neighbor independently.
pub struct FloodingEngine {
    db: SharedTieDb,
    policy: Arc<dyn FloodRepeaterPolicy>,
    config: FlooderConfig,
    links: DashMap<LinkId, LinkHandle>,
}

impl FloodingEngine {
    pub fn new(db: SharedTieDb, config: FlooderConfig) -> Self {
        Self::with_policy(db, config, Arc::new(FloodEverywhere))
    }

    /// Engine consulting `policy` for flood reduction
    pub fn with_policy(
        db: SharedTieDb,
        config: FlooderConfig,
        policy: Arc<dyn FloodRepeaterPolicy>,
    ) -> Self {
        FloodingEngine {
            db,
            policy,
            config,
            links: DashMap::new(),
        }
    }

    pub fn db(&self) -> &SharedTieDb {
        &self.db
    }

    /// Start flooding on a new adjacency.
    ///
    /// Packets for the neighbor are sent on `outbound_tx`; the returned
    /// sender takes packets received from it. Must be called from within a
    /// tokio runtime.
    pub fn add_link(
        &self,
        link: LinkInfo,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<mpsc::Sender<Vec<u8>>> {
        match self.links.entry(link.link_id) {
            Entry::Occupied(_) => Err(FloodingError::LinkExists(link.link_id)),
            Entry::Vacant(slot) => {
                info!("Adding {}", link);
                let handle = LinkFlooder::spawn(
                    link,
                    Arc::clone(&self.db),
                    Arc::clone(&self.policy),
                    &self.config,
                    outbound_tx,
                );
                let inbound = handle.inbound();
                slot.insert(handle);
                Ok(inbound)
            }
        }
    }

    /// Tear down an adjacency, discarding its queues
    pub async fn remove_link(&self, link_id: LinkId) -> Result<LinkStats> {
        let (_, handle) = self
            .links
            .remove(&link_id)
            .ok_or(FloodingError::UnknownLink(link_id))?;
        info!("Removing {}", handle.link());
        Ok(handle.shutdown().await)
    }

    /// Deliver a packet received on `link_id`
    pub async fn deliver(&self, link_id: LinkId, bytes: Vec<u8>) -> Result<()> {
        let inbound = self
            .links
            .get(&link_id)
            .map(|handle| handle.inbound())
            .ok_or(FloodingError::UnknownLink(link_id))?;
        inbound
            .send(bytes)
            .await
            .map_err(|_| FloodingError::LinkClosed(link_id))
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn link_ids(&self) -> Vec<LinkId> {
        let mut ids: Vec<LinkId> = self.links.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Adjacencies currently flooding, in link ID order
    pub fn links(&self) -> Vec<LinkInfo> {
        let mut links: Vec<LinkInfo> = self
            .links
            .iter()
            .map(|entry| entry.value().link().clone())
            .collect();
        links.sort_by_key(|link| link.link_id);
        links
    }

    pub fn has_link(&self, link_id: LinkId) -> bool {
        self.links.contains_key(&link_id)
    }

    /// Stop every link and wait for their tasks
    pub async fn shutdown(&self) {
        let link_ids = self.link_ids();
        info!("Shutting down flooding on {} link(s)", link_ids.len());
        for link_id in link_ids {
            if let Some((_, handle)) = self.links.remove(&link_id) {
                handle.shutdown().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_protocol::{FabricConfig, SystemId};
    use rift_tiedb::TieDatabase;
    use tokio::sync::RwLock;

    fn sid(value: u64) -> SystemId {
        SystemId::new(value).unwrap()
    }

    fn create_engine() -> FloodingEngine {
        let db = TieDatabase::new(sid(1), 0, Arc::new(FabricConfig::default())).unwrap();
        FloodingEngine::new(Arc::new(RwLock::new(db)), FlooderConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_remove_link() {
        let engine = create_engine();
        let (outbound_tx, _outbound_rx) = mpsc::channel(64);

        engine
            .add_link(LinkInfo::new(LinkId(1), sid(2), 1), outbound_tx.clone())
            .unwrap();
        assert_eq!(engine.link_count(), 1);
        assert!(engine.has_link(LinkId(1)));

        assert_eq!(
            engine
                .add_link(LinkInfo::new(LinkId(1), sid(3), 1), outbound_tx)
                .unwrap_err(),
            FloodingError::LinkExists(LinkId(1))
        );

        engine.remove_link(LinkId(1)).await.unwrap();
        assert_eq!(engine.link_count(), 0);
        assert_eq!(
            engine.remove_link(LinkId(1)).await.unwrap_err(),
            FloodingError::UnknownLink(LinkId(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_to_unknown_link() {
        let engine = create_engine();
        assert_eq!(
            engine.deliver(LinkId(9), vec![1, 2, 3]).await,
            Err(FloodingError::UnknownLink(LinkId(9)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_links() {
        let engine = create_engine();
        let (outbound_tx, _outbound_rx) = mpsc::channel(64);
        for id in 1..=3 {
            engine
                .add_link(LinkInfo::new(LinkId(id), sid(10 + id as u64), 1), outbound_tx.clone())
                .unwrap();
        }
        assert_eq!(engine.link_ids(), vec![LinkId(1), LinkId(2), LinkId(3)]);
        let neighbors: Vec<SystemId> = engine.links().iter().map(|link| link.neighbor).collect();
        assert_eq!(neighbors, vec![sid(11), sid(12), sid(13)]);

        engine.shutdown().await;
        assert_eq!(engine.link_count(), 0);
    }
}
