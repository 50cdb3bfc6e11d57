use anyhow::{Context, Result};
use rift_flooding::{FloodingEngine, LinkId, LinkInfo, LinkStats};
use rift_protocol::Direction;
use rift_tiedb::{LifetimeManager, SharedTieDb, TieDatabase};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::Config;
use crate::origination::OwnTies;

/// Attaches and detaches adjacencies while the node runs.
///
/// Adding or removing a link also regenerates the Node TIEs and default
/// routes the node originates.
#[derive(Clone)]
pub struct LinkControl {
    flooding: Arc<FloodingEngine>,
    own_ties: Arc<OwnTies>,
}

impl LinkControl {
    /// Start flooding towards a neighbor; returns the sender taking packets
    /// received from it
    pub async fn add_link(
        &self,
        link: LinkInfo,
        outbound_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<mpsc::Sender<Vec<u8>>> {
        let link_id = link.link_id;
        let inbound = self
            .flooding
            .add_link(link, outbound_tx)
            .with_context(|| format!("Failed to add {}", link_id))?;
        self.own_ties.regenerate(&self.flooding.links()).await?;
        Ok(inbound)
    }

    pub async fn remove_link(&self, link_id: LinkId) -> Result<LinkStats> {
        let stats = self
            .flooding
            .remove_link(link_id)
            .await
            .with_context(|| format!("Failed to remove {}", link_id))?;
        self.own_ties.regenerate(&self.flooding.links()).await?;
        Ok(stats)
    }
}

/// Main node orchestrator
pub struct Node {
    config: Config,
    db: SharedTieDb,
    lifetime: LifetimeManager,
    flooding: Arc<FloodingEngine>,
    own_ties: Arc<OwnTies>,
    summary_task: Option<JoinHandle<()>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing node components...");

        let db = TieDatabase::new(
            config.node.system_id,
            config.node.level,
            Arc::new(config.fabric.clone()),
        )
        .context("Failed to create TIE database")?;
        let db: SharedTieDb = Arc::new(RwLock::new(db));
        info!("✓ TIE database initialized");

        let lifetime = LifetimeManager::new(Arc::clone(&db), config.flooding.aging_interval());
        info!("✓ Lifetime manager initialized");

        let flooding = Arc::new(FloodingEngine::new(
            Arc::clone(&db),
            config.flooding.flooder_config(),
        ));
        info!("✓ Flooding engine initialized");

        let own_ties = Arc::new(OwnTies::new(Arc::clone(&db), &config.node, &config.prefixes));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            db,
            lifetime,
            flooding,
            own_ties,
            summary_task: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        info!("Starting riftnode services...");

        self.own_ties
            .originate_all(&self.flooding.links())
            .await
            .context("Failed to originate own TIEs")?;

        self.lifetime.start().await;
        info!("✓ Lifetime manager running");

        self.start_summary_log();

        info!("═══════════════════════════════════════════════");
        info!("  riftnode is now running");
        info!("═══════════════════════════════════════════════");
        info!("  Name: {}", self.config.node.name);
        info!("  System ID: {}", self.config.node.system_id);
        info!("  Level: {}", self.config.node.level);
        info!("  Advertised prefixes: {}", self.config.prefixes.len());
        info!("═══════════════════════════════════════════════");

        self.wait_for_shutdown().await;

        info!("Shutting down riftnode...");
        self.shutdown().await
    }

    fn start_summary_log(&mut self) {
        let db = Arc::clone(&self.db);
        let period = self.config.flooding.summary_log_interval();

        self.summary_task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let db = db.read().await;
                let own = db.system_id();
                let north = db.snapshot(Some(Direction::North)).count();
                let south = db.snapshot(Some(Direction::South)).count();
                let originated = db
                    .snapshot(None)
                    .filter(|header| header.tie_id.originator == own)
                    .count();
                info!(
                    "TIE database: {} TIE(s) ({} north, {} south, {} own)",
                    db.len(),
                    north,
                    south,
                    originated
                );
            }
        }));
        debug!("Database summary log started (interval: {:?})", period);
    }

    async fn wait_for_shutdown(&mut self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C signal");
            }
            _ = self.shutdown_rx.recv() => {
                info!("Received shutdown signal");
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Stopping flooding...");
        self.flooding.shutdown().await;

        info!("Stopping lifetime manager...");
        self.lifetime.shutdown().await;

        if let Some(task) = self.summary_task.take() {
            task.abort();
        }

        info!("Shutdown complete");
        Ok(())
    }

    pub fn db(&self) -> &SharedTieDb {
        &self.db
    }

    pub fn flooding(&self) -> &FloodingEngine {
        &self.flooding
    }

    /// Handle a transport attaches its links through
    pub fn links(&self) -> LinkControl {
        LinkControl {
            flooding: Arc::clone(&self.flooding),
            own_ties: Arc::clone(&self.own_ties),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }
}
