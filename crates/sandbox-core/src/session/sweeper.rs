//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::manager::SessionManager;
use crate::metrics::METRICS;

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its current pass to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}

/// Run [`SessionManager::sweep_expired`] every `interval` until shut down.
pub fn spawn_sweeper(manager: Arc<SessionManager>, interval: Duration) -> SweeperHandle {
    let (shutdown, mut stop) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.sweep_expired().await {
                        Ok(report) => {
                            debug!(examined = report.examined, expired = report.expired, "sweep tick");
                            if report.expired > 0 {
                                METRICS.flush();
                            }
                        }
                        Err(e) => warn!(error = %e, "expiry sweep failed"),
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("sweeper stopped");
    });

    SweeperHandle { shutdown, task }
}
