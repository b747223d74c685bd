use std::time::Duration;

use thiserror::Error;

/// Errors raised while reaching an environment.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Operation not allowed on the local environment")]
    LocalEnvironment,

    #[error("Environment '{env_id}' is not connected (no active tunnel)")]
    NotConnected { env_id: String },

    #[error("Request to '{target}' timed out after {}s", timeout.as_secs())]
    Timeout { target: String, timeout: Duration },

    #[error("Environment at '{target}' is unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("Request to '{target}' failed: {reason}")]
    Request { target: String, reason: String },

    #[error("Tunnel error for environment '{env_id}': {reason}")]
    Tunnel { env_id: String, reason: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request body could not be serialized; nothing was sent.
    #[error("Cannot encode request body: {0}")]
    Encode(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Timeouts and connection-level failures. A remote that answered with
    /// an error status is not retryable here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Unreachable { .. }
        )
    }

    /// True when the environment could not be reached at all, as opposed
    /// to a malformed request or response.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::Unreachable { .. }
                | TransportError::NotConnected { .. }
                | TransportError::Tunnel { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(TransportError::Timeout {
            target: "http://x".to_string(),
            timeout: Duration::from_secs(10),
        }
        .is_retryable());
        assert!(TransportError::Unreachable {
            target: "http://x".to_string(),
            reason: "refused".to_string(),
        }
        .is_retryable());
        assert!(!TransportError::NotConnected {
            env_id: "e1".to_string()
        }
        .is_retryable());
        assert!(!TransportError::LocalEnvironment.is_retryable());
        let encode = TransportError::Encode("key must be a string".to_string());
        assert!(!encode.is_retryable());
        assert!(!encode.is_unreachable());
    }

    #[test]
    fn test_timeout_message() {
        let err = TransportError::Timeout {
            target: "http://10.0.0.5:3552/health".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(
            err.to_string(),
            "Request to 'http://10.0.0.5:3552/health' timed out after 10s"
        );
    }
}
