//! GitOps-specific error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::projects::ProjectError;
use crate::secrets::SecretError;

/// Errors that can occur during GitOps operations.
#[derive(Error, Debug)]
pub enum GitOpsError {
    #[error("Repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("Sync '{0}' not found")]
    SyncNotFound(String),

    #[error("Environment '{0}' not found")]
    EnvironmentNotFound(String),

    #[error("Environment '{0}' is disabled")]
    EnvironmentDisabled(String),

    #[error("Repository '{0}' is disabled")]
    RepositoryDisabled(String),

    #[error("Repository is in use by {count} sync(s)")]
    RepositoryInUse { count: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("compose file '{path}' not found in branch '{branch}'")]
    ComposeNotFound { path: String, branch: String },

    #[error("Path traversal detected: {0}")]
    PathTraversal(String),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File operation failed: {0}")]
    FileOperation(String),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Git network error: {0}")]
    GitNetworkError(String),

    #[error("Git authentication failed: {0}")]
    GitAuthFailed(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Sync '{0}' is already running")]
    AlreadyRunning(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl From<std::io::Error> for GitOpsError {
    fn from(err: std::io::Error) -> Self {
        GitOpsError::FileOperation(err.to_string())
    }
}

impl GitOpsError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GitOpsError::GitNetworkError(_) | GitOpsError::Timeout { .. }
        )
    }
}

/// Classifies a git stderr string into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> GitOpsError {
    let lower = stderr.to_lowercase();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitOpsError::GitNetworkError(stderr.trim().to_string());
    }

    if lower.contains("remote branch") && lower.contains("not found") {
        return GitOpsError::BranchNotFound(stderr.trim().to_string());
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("host key verification failed")
        || lower.contains("could not read username")
    {
        return GitOpsError::GitAuthFailed(stderr.trim().to_string());
    }

    GitOpsError::GitOperation(stderr.trim().to_string())
}

/// Result type for GitOps operations.
pub type Result<T> = std::result::Result<T, GitOpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network() {
        let err = classify_git_error(
            "fatal: unable to access 'https://git.example.com/x.git/': Could not resolve host",
        );
        assert!(matches!(err, GitOpsError::GitNetworkError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_auth() {
        assert!(matches!(
            classify_git_error("git@github.com: Permission denied (publickey)."),
            GitOpsError::GitAuthFailed(_)
        ));
        assert!(matches!(
            classify_git_error("Host key verification failed."),
            GitOpsError::GitAuthFailed(_)
        ));
    }

    #[test]
    fn test_classify_missing_branch() {
        let err = classify_git_error("warning: Could not find remote branch nope to clone.\nfatal: Remote branch nope not found in upstream origin");
        assert!(matches!(err, GitOpsError::BranchNotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = GitOpsError::Timeout {
            operation: "git clone",
            timeout: Duration::from_secs(300),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "git clone timed out after 300s");
    }

    #[test]
    fn test_compose_not_found_message() {
        let err = GitOpsError::ComposeNotFound {
            path: "docker-compose.yml".to_string(),
            branch: "main".to_string(),
        };
        assert!(err.to_string().contains("not found"));
    }
}
