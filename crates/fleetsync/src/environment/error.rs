use thiserror::Error;

use crate::db::DatabaseError;
use crate::edge::TransportError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Environment '{0}' not found")]
    NotFound(String),

    #[error("Cannot {operation} the local environment")]
    LocalEnvironment { operation: &'static str },

    #[error("Environment '{id}' is used by {count} GitOps sync(s)")]
    InUse { id: String, count: u64 },

    #[error("Environment '{id}' is disabled")]
    Disabled { id: String },

    #[error("Invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Remote returned HTTP {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error("Pairing failed: {0}")]
    Pairing(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, EnvironmentError>;
