use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::edge::TransportError),

    #[error("Environment error: {0}")]
    Environment(#[from] crate::environment::EnvironmentError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] crate::gitops::GitOpsError),

    #[error("Credential error: {0}")]
    Credential(#[from] crate::credentials::CredentialError),

    #[error("Project error: {0}")]
    Project(#[from] crate::projects::ProjectError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

pub type Result<T> = std::result::Result<T, FleetError>;
