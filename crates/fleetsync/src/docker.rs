//! Local Docker engine access.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Minimal engine capability used for local liveness checks.
#[async_trait]
pub trait DockerEngine: Send + Sync {
    /// Returns `Err` with a readable reason when the engine does not answer.
    async fn ping(&self, timeout: Duration) -> Result<(), String>;
}

/// Talks to the engine through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct CliDockerEngine {
    binary: String,
}

impl Default for CliDockerEngine {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl CliDockerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different CLI binary (e.g. `podman`).
    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

#[async_trait]
impl DockerEngine for CliDockerEngine {
    async fn ping(&self, timeout: Duration) -> Result<(), String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["version", "--format", "{{.Server.Version}}"])
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to run {}: {}", self.binary, e)),
            Err(_) => return Err(format!("engine ping timed out after {}s", timeout.as_secs())),
        };

        if output.status.success() {
            log::debug!(
                "Docker engine version {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_reports_error() {
        let engine = CliDockerEngine::with_binary("fleetsync-no-such-docker-binary");
        let err = engine.ping(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.contains("failed to run"));
    }
}
