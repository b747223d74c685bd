//! Passive liveness from agent keep-alives.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::error::Result;
use super::store::EnvironmentStore;
use crate::worker::BackgroundQueue;

/// Applies agent heartbeats, writing at most once per `stale_after` window
/// per environment.
pub struct HeartbeatReconciler {
    store: Arc<dyn EnvironmentStore>,
    stale_after: Duration,
    queue: Option<BackgroundQueue>,
}

impl HeartbeatReconciler {
    pub fn new(store: Arc<dyn EnvironmentStore>, stale_after: Duration) -> Self {
        Self {
            store,
            stale_after,
            queue: None,
        }
    }

    /// Routes [`touch_in_background`](Self::touch_in_background) through a
    /// bounded queue instead of running inline.
    pub fn with_queue(mut self, queue: BackgroundQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Records a heartbeat seen at `now`. Returns whether a write happened.
    pub fn touch(&self, env_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let lookback = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let updated = self
            .store
            .touch_heartbeat_if_stale(env_id, now, now - lookback)?;
        if updated {
            log::debug!("Heartbeat recorded for environment {}", env_id);
        }
        Ok(updated)
    }

    /// Fire-and-forget variant for request handlers. Returns false when the
    /// queue rejected the task.
    pub fn touch_in_background(&self, env_id: &str) -> bool {
        let now = Utc::now();
        match &self.queue {
            Some(queue) => {
                let store = Arc::clone(&self.store);
                let stale_after = self.stale_after;
                let env_id = env_id.to_string();
                queue.submit("heartbeat", async move {
                    HeartbeatReconciler::new(store, stale_after).touch(&env_id, now)?;
                    Ok(())
                })
            }
            None => {
                if let Err(e) = self.touch(env_id, now) {
                    log::warn!("Heartbeat for environment {} failed: {}", env_id, e);
                }
                true
            }
        }
    }
}
