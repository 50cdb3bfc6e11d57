//! Async driver for one flooding adjacency
//!
//! A `LinkFlooder` task owns the `LinkReconciler` of one link. It consumes
//! raw packets from the transport, database change notifications, and two
//! timers, and hands encoded packets back to the transport.

use rift_protocol::ProtocolPacket;
use rift_tiedb::SharedTieDb;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{FloodingError, Result};
use crate::link::{LinkId, LinkInfo};
use crate::policy::FloodRepeaterPolicy;
use crate::reconciler::{LinkReconciler, LinkStats};

/// Timers and buffer sizes of a link flooder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlooderConfig {
    /// How often queues are serviced (acks, retransmits, requests)
    pub service_interval: Duration,

    /// How often a full summary is sent regardless of changes
    pub tide_interval: Duration,

    /// Capacity of the inbound packet channel
    pub inbound_capacity: usize,
}

impl Default for FlooderConfig {
    fn default() -> Self {
        FlooderConfig {
            service_interval: Duration::from_secs(1),
            tide_interval: Duration::from_secs(2),
            inbound_capacity: 256,
        }
    }
}

/// Handle to a running link flooder
pub struct LinkHandle {
    link: LinkInfo,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<LinkStats>,
}

impl LinkHandle {
    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    pub fn link_id(&self) -> LinkId {
        self.link.link_id
    }

    /// Sender the transport uses to deliver packets received on this link
    pub fn inbound(&self) -> mpsc::Sender<Vec<u8>> {
        self.inbound_tx.clone()
    }

    /// Deliver one received packet
    pub async fn deliver(&self, bytes: Vec<u8>) -> Result<()> {
        self.inbound_tx
            .send(bytes)
            .await
            .map_err(|_| FloodingError::LinkClosed(self.link.link_id))
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Tear the adjacency down; pending queues are discarded
    pub async fn shutdown(self) -> LinkStats {
        let _ = self.shutdown_tx.send(());
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("{}: flooder task failed: {}", self.link.link_id, e);
                LinkStats::default()
            }
        }
    }
}

/// Per-link flooding task
pub struct LinkFlooder {
    db: SharedTieDb,
    reconciler: LinkReconciler,
    outbound_tx: mpsc::Sender<Vec<u8>>,
}

impl LinkFlooder {
    /// Spawn the flooder for `link`.
    ///
    /// Encoded packets for the neighbor are sent on `outbound_tx`. The task
    /// stops on shutdown, or when the transport drops either channel.
    pub fn spawn(
        link: LinkInfo,
        db: SharedTieDb,
        policy: Arc<dyn FloodRepeaterPolicy>,
        config: &FlooderConfig,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> LinkHandle {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let flooder = LinkFlooder {
            db,
            reconciler: LinkReconciler::new(link.clone(), policy),
            outbound_tx,
        };
        let task = tokio::spawn(flooder.run(config.clone(), inbound_rx, shutdown_rx));

        LinkHandle {
            link,
            inbound_tx,
            shutdown_tx,
            task,
        }
    }

    async fn run(
        mut self,
        config: FlooderConfig,
        mut inbound_rx: mpsc::Receiver<Vec<u8>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> LinkStats {
        let link_id = self.reconciler.link().link_id;
        info!("{}: flooding started", self.reconciler.link());

        let mut changes = self.db.read().await.subscribe();
        let mut service = interval(config.service_interval);
        service.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = interval(config.tide_interval);
        summary.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let packets = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("{}: shutdown requested", link_id);
                    break;
                }
                received = inbound_rx.recv() => match received {
                    Some(bytes) => self.handle_bytes(&bytes).await,
                    None => {
                        debug!("{}: transport closed inbound channel", link_id);
                        break;
                    }
                },
                change = changes.recv() => {
                    match change {
                        Ok(change) => self.reconciler.on_db_change(&change),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("{}: missed {} database change(s), resynchronizing", link_id, missed);
                            self.reconciler.mark_summary_pending();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                    Vec::new()
                }
                _ = service.tick() => {
                    let db = self.db.read().await;
                    self.reconciler.service_queues(&db);
                    self.reconciler.take_packets(&db)
                }
                _ = summary.tick() => {
                    let db = self.db.read().await;
                    self.reconciler.queue_tide(&db);
                    self.reconciler.take_packets(&db)
                }
            };

            if !self.transmit(packets).await {
                debug!("{}: transport closed outbound channel", link_id);
                break;
            }
        }

        self.reconciler.clear_queues();
        info!("{}: flooding stopped", link_id);
        self.reconciler.stats().clone()
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) -> Vec<ProtocolPacket> {
        let link_id = self.reconciler.link().link_id;
        let mut db = self.db.write().await;

        let packet = match ProtocolPacket::decode(bytes, db.config()) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("{}: dropping undecodable packet: {}", link_id, e);
                self.reconciler.record_malformed();
                return Vec::new();
            }
        };

        let kind = packet.content.kind();
        if let Err(e) = self.reconciler.handle_packet(&mut db, packet) {
            if e.is_packet_local() {
                debug!("{}: dropping {}: {}", link_id, kind, e);
            } else {
                warn!("{}: failed to process {}: {}", link_id, kind, e);
            }
        }
        self.reconciler.take_packets(&db)
    }

    /// Encode and hand packets to the transport; false once it is gone
    async fn transmit(&self, packets: Vec<ProtocolPacket>) -> bool {
        for packet in packets {
            let bytes = match packet.encode() {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "{}: cannot encode {}: {}",
                        self.reconciler.link().link_id,
                        packet.content.kind(),
                        e
                    );
                    continue;
                }
            };
            if self.outbound_tx.send(bytes).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FloodEverywhere;
    use rift_protocol::{
        Direction, FabricConfig, NodeTieElement, PacketContent, SystemId, TieElement, TieId,
        TieType,
    };
    use rift_tiedb::TieDatabase;
    use tokio::sync::RwLock;

    fn sid(value: u64) -> SystemId {
        SystemId::new(value).unwrap()
    }

    fn shared_db(system_id: u64, level: u8) -> SharedTieDb {
        let db = TieDatabase::new(sid(system_id), level, Arc::new(FabricConfig::default()))
            .unwrap();
        Arc::new(RwLock::new(db))
    }

    #[tokio::test(start_paused = true)]
    async fn test_flooder_sends_summary_and_stops() {
        let db = shared_db(1, 0);
        let tie_id = TieId::new(Direction::North, sid(1), TieType::Node, 1);
        db.write()
            .await
            .originate(tie_id, TieElement::Node(NodeTieElement::new(0)))
            .unwrap();

        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let handle = LinkFlooder::spawn(
            LinkInfo::new(LinkId(1), sid(2), 1),
            Arc::clone(&db),
            Arc::new(FloodEverywhere),
            &FlooderConfig::default(),
            outbound_tx,
        );

        let config = FabricConfig::default();
        let mut saw_tide = false;
        for _ in 0..4 {
            let bytes = outbound_rx.recv().await.unwrap();
            let packet = ProtocolPacket::decode(&bytes, &config).unwrap();
            assert_eq!(packet.header.sender, sid(1));
            if let PacketContent::Tide(tide) = packet.content {
                assert_eq!(tide.headers.len(), 1);
                saw_tide = true;
                break;
            }
        }
        assert!(saw_tide);
        assert!(handle.is_running());

        let stats = handle.shutdown().await;
        assert!(stats.tides_sent >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_dropped_link_survives() {
        let db = shared_db(1, 0);
        let (outbound_tx, _outbound_rx) = mpsc::channel(64);
        let handle = LinkFlooder::spawn(
            LinkInfo::new(LinkId(3), sid(2), 1),
            Arc::clone(&db),
            Arc::new(FloodEverywhere),
            &FlooderConfig::default(),
            outbound_tx,
        );

        handle.deliver(vec![0xde, 0xad, 0xbe, 0xef]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_running());

        let stats = handle.shutdown().await;
        assert_eq!(stats.malformed_dropped, 1);
        assert!(db.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flooder_stops_when_transport_gone() {
        let db = shared_db(1, 0);
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        drop(outbound_rx);
        let handle = LinkFlooder::spawn(
            LinkInfo::new(LinkId(4), sid(2), 1),
            db,
            Arc::new(FloodEverywhere),
            &FlooderConfig::default(),
            outbound_tx,
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_running());
    }
}
