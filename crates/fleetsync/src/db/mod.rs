//! SQLite persistence.
//!
//! Uses rusqlite with a thread-safe `Database` handle. All access is
//! serialized through a `Mutex<Connection>`. The store traits consumed by
//! the services (`EnvironmentStore`, `GitOpsStore`, `RegistryStore`,
//! `ProjectStore`) are implemented on `Database` in the `*_repo` modules.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod environment_repo;
pub mod error;
pub mod event_repo;
pub mod gitops_repo;
pub mod migrations;
pub mod project_repo;
pub mod registry_repo;

pub use error::DatabaseError;

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). WAL mode is enabled for file databases.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run_all(&mut conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&mut conn)
    }
}

/// Returns the default database path: `~/.fleetsync/data/fleetsync.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".fleetsync").join("data").join("fleetsync.db"))
}

/// Formats a timestamp for storage.
///
/// Fixed millisecond precision with a `Z` suffix keeps every stored value
/// the same width, so SQL string comparison orders them chronologically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp.
pub fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidValue {
            column,
            reason: format!("'{}': {}", value, e),
        })
}

/// Parses an optional stored timestamp.
pub fn parse_optional_timestamp(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

/// Parses a stored enum value through its `FromStr` implementation.
pub fn parse_enum<T>(column: &'static str, value: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| DatabaseError::InvalidValue { column, reason })
}

/// Truncates a timestamp to the stored precision. Used wherever a value is
/// compared with what a round trip through the database returns.
pub fn storage_precision(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&format_timestamp(&ts))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(ts)
}
