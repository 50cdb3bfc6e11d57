//! Periodic aging of stored TIEs

use crate::SharedTieDb;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default aging interval
pub const DEFAULT_AGING_INTERVAL: Duration = Duration::from_secs(1);

/// Background task decrementing remaining lifetimes.
///
/// Lifetimes are reduced by the wall time actually elapsed between ticks,
/// carrying sub-second remainders, so a delayed tick never ages TIEs by too
/// little or too much. Own TIEs that reach the refresh threshold are
/// re-originated in the same step.
pub struct LifetimeManager {
    db: SharedTieDb,
    tick_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    aging_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl LifetimeManager {
    pub fn new(db: SharedTieDb, tick_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        Self {
            db,
            tick_interval,
            shutdown_tx,
            aging_task: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the aging loop
    pub async fn start(&self) {
        let mut task = self.aging_task.write().await;
        if task.is_some() {
            debug!("Lifetime manager already running");
            return;
        }

        info!(
            "Starting TIE lifetime manager (interval: {:?})",
            self.tick_interval
        );

        let db = Arc::clone(&self.db);
        let tick_interval = self.tick_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            let mut last = Instant::now();
            let mut carry = Duration::ZERO;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Lifetime manager shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        carry += now.duration_since(last);
                        last = now;

                        let elapsed_secs = carry.as_secs();
                        if elapsed_secs == 0 {
                            continue;
                        }
                        carry -= Duration::from_secs(elapsed_secs);

                        let elapsed = u32::try_from(elapsed_secs).unwrap_or(u32::MAX);
                        let mut tiedb = db.write().await;
                        let expired = tiedb.expire_tick(elapsed);
                        if !expired.is_empty() {
                            debug!("{} TIE(s) expired", expired.len());
                        }
                        let refreshed = tiedb.refresh_own();
                        if !refreshed.is_empty() {
                            debug!("{} own TIE(s) refreshed", refreshed.len());
                        }
                    }
                }
            }
        }));
    }

    pub async fn is_running(&self) -> bool {
        self.aging_task
            .read()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop the aging loop and wait for it to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.aging_task.write().await.take() {
            let _ = handle.await;
        }
    }
}
