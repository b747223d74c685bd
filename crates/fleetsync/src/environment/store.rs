//! Persistence contract for environments.

use chrono::{DateTime, Utc};

use super::model::{Environment, EnvironmentPatch, EnvironmentStatus};
use crate::db::DatabaseError;

/// Durable environment storage.
///
/// `touch_heartbeat_if_stale` and `record_probe` are single conditional
/// writes: implementations must test and set in one statement so that
/// concurrent callers cannot lose updates or resurrect a `pending` row.
pub trait EnvironmentStore: Send + Sync {
    fn create(&self, env: &Environment) -> Result<(), DatabaseError>;

    fn get_by_id(&self, id: &str) -> Result<Option<Environment>, DatabaseError>;

    fn list(&self) -> Result<Vec<Environment>, DatabaseError>;

    /// Enabled environments other than the local one.
    fn list_remote(&self) -> Result<Vec<Environment>, DatabaseError>;

    /// Applies a partial update. Returns the updated row, or `None` if the
    /// environment does not exist.
    fn patch(
        &self,
        id: &str,
        patch: &EnvironmentPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Environment>, DatabaseError>;

    /// Returns false when nothing was deleted.
    fn delete(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Marks the environment online with `last_seen = now`, but only when the
    /// stored `last_seen` is unset or older than `stale_before`. A `pending`
    /// environment keeps its status; only `last_seen` moves.
    ///
    /// Returns whether a row was written.
    fn touch_heartbeat_if_stale(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Writes a probe outcome unless the environment is `pending`.
    /// `seen_at: None` leaves `last_seen` untouched.
    ///
    /// Returns whether a row was written.
    fn record_probe(
        &self,
        id: &str,
        status: EnvironmentStatus,
        seen_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;
}
