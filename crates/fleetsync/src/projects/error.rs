use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::edge::TransportError;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project '{0}' not found")]
    NotFound(String),

    #[error("Project '{name}' already exists on environment '{environment_id}'")]
    AlreadyExists { environment_id: String, name: String },

    #[error("Invalid project name '{0}'")]
    InvalidName(String),

    #[error("Invalid compose file: {0}")]
    InvalidCompose(String),

    #[error("Environment '{0}' not found")]
    EnvironmentNotFound(String),

    #[error("Deploying project '{project}' failed: {reason}")]
    Deploy { project: String, reason: String },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ProjectError>;
