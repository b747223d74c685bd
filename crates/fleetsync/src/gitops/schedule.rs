//! Due-time calculation for scheduled syncs.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::model::GitOpsSync;

fn interval_of(sync: &GitOpsSync) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(sync.sync_interval))
}

/// Earliest nominal time of the next scheduled run, `None` when the sync
/// never ran or is not scheduled.
pub fn next_due_at(sync: &GitOpsSync) -> Option<DateTime<Utc>> {
    if !sync.auto_sync {
        return None;
    }
    sync.last_sync_at.map(|last| last + interval_of(sync))
}

/// A sync is due when auto-sync is on and it either never ran or
/// `now + drift_buffer` has reached `last_sync_at + sync_interval`.
///
/// The buffer lets a sweep that fires a few seconds early still pick up a
/// sync instead of pushing it back by a whole sweep interval.
pub fn is_due(sync: &GitOpsSync, now: DateTime<Utc>, drift_buffer: Duration) -> bool {
    if !sync.auto_sync {
        return false;
    }
    let Some(last) = sync.last_sync_at else {
        return true;
    };
    let drift = chrono::Duration::from_std(drift_buffer).unwrap_or_else(|_| chrono::Duration::zero());
    now + drift >= last + interval_of(sync)
}
