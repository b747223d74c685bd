//! Per-sync exclusive leases.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Tracks which sync IDs currently have a run in flight.
///
/// At most one [`SyncLease`] exists per ID; it is released on drop, so a
/// run that errors, panics or is cancelled still frees its ID.
#[derive(Debug, Clone, Default)]
pub struct SyncLeases {
    held: Arc<Mutex<HashSet<String>>>,
}

impl SyncLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `sync_id`, or `None` while another run holds it.
    pub fn try_acquire(&self, sync_id: &str) -> Option<SyncLease> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(sync_id.to_string()) {
            return None;
        }
        Some(SyncLease {
            sync_id: sync_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, sync_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(sync_id)
    }
}

#[derive(Debug)]
pub struct SyncLease {
    sync_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl SyncLease {
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }
}

impl Drop for SyncLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.sync_id);
    }
}
