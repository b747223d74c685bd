use thiserror::Error;

use crate::db::DatabaseError;
use crate::edge::TransportError;
use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credentials cannot be pushed to the local environment")]
    LocalEnvironment,

    #[error("Environment '{0}' not found")]
    EnvironmentNotFound(String),

    #[error("Environment '{0}' is disabled")]
    EnvironmentDisabled(String),

    #[error("Registry '{0}' not found")]
    RegistryNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Credential sync returned HTTP {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error("Credential sync rejected by agent: {0}")]
    Rejected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

pub type Result<T> = std::result::Result<T, CredentialError>;
