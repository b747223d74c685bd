//! Periodic GitOps sweep trigger.
//!
//! The reconciler owns no timer; this scheduler is the external caller that
//! drives `sync_all_enabled` on an interval and on manual triggers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reconciler::GitOpsReconciler;

/// Periodic sweep scheduler.
pub struct SyncScheduler {
    reconciler: Arc<GitOpsReconciler>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub fn new(reconciler: Arc<GitOpsReconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts the sweep loop on the current runtime. A message on
    /// `trigger_rx` runs a sweep immediately.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval_timer.tick().await; // skip immediate first tick
            let mut triggers_open = true;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval_timer.tick() => {},
                    trigger = trigger_rx.recv(), if triggers_open => match trigger {
                        Ok(()) => log::info!("Manual GitOps sweep triggered"),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::debug!("Coalesced {} queued sweep triggers", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            log::debug!("Sweep trigger channel closed; interval only");
                            triggers_open = false;
                            continue;
                        }
                    },
                }

                match reconciler.sync_all_enabled(&shutdown).await {
                    Ok(report) if report.due > 0 => log::debug!("Sweep report: {:?}", report),
                    Ok(_) => {}
                    Err(e) => log::error!("GitOps sweep failed: {}", e),
                }

                if shutdown.is_cancelled() {
                    break;
                }
            }
            log::info!("GitOps scheduler stopped");
        })
    }

    /// Signals the scheduler to stop. A sweep in flight is cancelled and
    /// its runs are recorded as failed.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
