use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::ENCRYPTION_KEY_ENV_VAR;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub workspace_dir: Option<String>,
    #[serde(default)]
    pub projects_dir: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub gitops: GitOpsConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            workspace_dir: None,
            projects_dir: None,
            timeouts: TimeoutConfig::default(),
            gitops: GitOpsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            encryption: EncryptionConfig::default(),
            logging: LoggingConfig::default(),
            background: BackgroundConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Database file, falling back to `~/.fleetsync/data/fleetsync.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(crate::secrets::expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }

    /// Parent directory for per-run scratch clones.
    pub fn workspace_dir(&self) -> PathBuf {
        match &self.workspace_dir {
            Some(path) => PathBuf::from(crate::secrets::expand_home(path)),
            None => std::env::temp_dir().join("fleetsync-gitops"),
        }
    }

    /// Root directory for local compose projects.
    pub fn projects_dir(&self) -> PathBuf {
        match &self.projects_dir {
            Some(path) => PathBuf::from(crate::secrets::expand_home(path)),
            None => dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".fleetsync")
                .join("projects"),
        }
    }
}

/// Deadlines for network-bound operations, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_health_secs")]
    pub health_secs: u64,
    #[serde(default = "default_proxy_secs")]
    pub proxy_secs: u64,
    #[serde(default = "default_sync_push_secs")]
    pub sync_push_secs: u64,
    #[serde(default = "default_git_secs")]
    pub git_secs: u64,
    /// Upper bound for a single `docker compose` invocation or remote deploy.
    #[serde(default = "default_deploy_secs")]
    pub deploy_secs: u64,
}

fn default_health_secs() -> u64 {
    10
}

fn default_proxy_secs() -> u64 {
    30
}

fn default_sync_push_secs() -> u64 {
    30
}

fn default_git_secs() -> u64 {
    300
}

fn default_deploy_secs() -> u64 {
    600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_secs: default_health_secs(),
            proxy_secs: default_proxy_secs(),
            sync_push_secs: default_sync_push_secs(),
            git_secs: default_git_secs(),
            deploy_secs: default_deploy_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn proxy(&self) -> Duration {
        Duration::from_secs(self.proxy_secs)
    }

    pub fn sync_push(&self) -> Duration {
        Duration::from_secs(self.sync_push_secs)
    }

    pub fn git(&self) -> Duration {
        Duration::from_secs(self.git_secs)
    }

    pub fn deploy(&self) -> Duration {
        Duration::from_secs(self.deploy_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsConfig {
    #[serde(default = "default_drift_buffer_secs")]
    pub drift_buffer_secs: u64,
    #[serde(default = "default_max_concurrent_syncs")]
    pub max_concurrent_syncs: usize,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_drift_buffer_secs() -> u64 {
    30
}

fn default_max_concurrent_syncs() -> usize {
    num_cpus::get().max(1)
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            drift_buffer_secs: default_drift_buffer_secs(),
            max_concurrent_syncs: default_max_concurrent_syncs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    30
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Where the credential encryption key comes from. Resolution order is
/// direct value, then file, then environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default = "default_key_env_var")]
    pub key_env_var: String,
}

fn default_key_env_var() -> String {
    ENCRYPTION_KEY_ENV_VAR.to_string()
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_file: None,
            key_env_var: default_key_env_var(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    256
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}
