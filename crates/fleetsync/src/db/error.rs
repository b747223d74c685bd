use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("Cannot prepare database location '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Invalid value in column '{column}': {reason}")]
    InvalidValue { column: &'static str, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// True when a `UNIQUE` constraint rejected the write, e.g. a second
    /// repository with the same name.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}
