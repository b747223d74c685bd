//! Git repository and sync definition types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::model::FieldUpdate;

/// Authentication mode for a Git remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitAuthType {
    #[default]
    None,
    Http,
    Ssh,
}

impl GitAuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitAuthType::None => "none",
            GitAuthType::Http => "http",
            GitAuthType::Ssh => "ssh",
        }
    }
}

impl std::str::FromStr for GitAuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(GitAuthType::None),
            "http" => Ok(GitAuthType::Http),
            "ssh" => Ok(GitAuthType::Ssh),
            other => Err(format!("unknown git auth type '{}'", other)),
        }
    }
}

/// SSH host key verification policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    Strict,
    #[default]
    AcceptNew,
    Skip,
}

impl HostKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "strict",
            HostKeyPolicy::AcceptNew => "accept_new",
            HostKeyPolicy::Skip => "skip",
        }
    }

    /// Value for ssh's `StrictHostKeyChecking` option.
    pub fn ssh_option(&self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "yes",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Skip => "no",
        }
    }
}

impl std::str::FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(HostKeyPolicy::Strict),
            "accept_new" => Ok(HostKeyPolicy::AcceptNew),
            "skip" => Ok(HostKeyPolicy::Skip),
            other => Err(format!("unknown host key policy '{}'", other)),
        }
    }
}

/// A Git remote with its (encrypted) credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepository {
    pub id: String,
    pub name: String,
    pub url: String,
    pub auth_type: GitAuthType,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub encrypted_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub encrypted_ssh_key: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a repository. Secrets arrive in plaintext and are
/// encrypted before they are stored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth_type: GitAuthType,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial update for a repository. Token and SSH key use [`FieldUpdate`]
/// so "unchanged" and "removed" stay distinguishable.
#[derive(Debug, Clone, Default)]
pub struct RepositoryPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub auth_type: Option<GitAuthType>,
    pub username: FieldUpdate<String>,
    pub token: FieldUpdate<String>,
    pub ssh_key: FieldUpdate<String>,
    pub host_key_policy: Option<HostKeyPolicy>,
    pub description: FieldUpdate<String>,
    pub enabled: Option<bool>,
}

/// Outcome of the last sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncStatus::Success),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Binds a repository/branch/compose path to a project on an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOpsSync {
    pub id: String,
    pub name: String,
    pub environment_id: String,
    pub repository_id: String,
    pub branch: String,
    pub compose_path: String,
    pub project_name: String,
    /// Bound lazily on the first successful run.
    pub project_id: Option<String>,
    pub auto_sync: bool,
    /// Minutes between scheduled runs.
    pub sync_interval: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
    pub last_sync_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GitOpsSync {
    /// Name used for the managed project: `project_name`, or the sync's own
    /// name when that is blank.
    pub fn effective_project_name(&self) -> &str {
        if self.project_name.trim().is_empty() {
            &self.name
        } else {
            &self.project_name
        }
    }
}

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_COMPOSE_PATH: &str = "docker-compose.yml";
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 5;

/// Input for creating a sync definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSync {
    pub name: String,
    pub environment_id: String,
    pub repository_id: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub compose_path: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default)]
    pub sync_interval: Option<u32>,
}

/// Partial update for a sync definition.
#[derive(Debug, Clone, Default)]
pub struct SyncPatch {
    pub name: Option<String>,
    pub repository_id: Option<String>,
    pub branch: Option<String>,
    pub compose_path: Option<String>,
    pub project_name: Option<String>,
    pub auto_sync: Option<bool>,
    pub sync_interval: Option<u32>,
}

impl SyncPatch {
    /// True when the patch changes what a run would fetch or when it runs.
    pub fn affects_schedule_or_source(&self) -> bool {
        self.repository_id.is_some()
            || self.branch.is_some()
            || self.compose_path.is_some()
            || self.sync_interval.is_some()
            || self.auto_sync == Some(true)
    }
}

/// Persisted result of one run. `commit: None` keeps the previous commit.
#[derive(Debug, Clone)]
pub struct SyncResultRecord {
    pub at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub commit: Option<String>,
}

/// What a single run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunResult {
    pub sync_id: String,
    pub project_id: String,
    pub commit: Option<String>,
    pub created_project: bool,
    pub content_changed: bool,
    pub redeployed: bool,
    pub message: String,
}

/// Aggregate counts for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub considered: usize,
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_busy: usize,
}

fn default_true() -> bool {
    true
}
