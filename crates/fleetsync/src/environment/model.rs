//! Environment data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ID reserved for the Docker host this manager runs on.
pub const LOCAL_ENVIRONMENT_ID: &str = "0";

/// Returns true for the reserved local environment ID.
pub fn is_local_id(id: &str) -> bool {
    id == LOCAL_ENVIRONMENT_ID
}

/// Liveness status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentStatus {
    Offline,
    Online,
    /// Awaiting pairing. Never overwritten by probes.
    Pending,
    Error,
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentStatus::Offline => "offline",
            EnvironmentStatus::Online => "online",
            EnvironmentStatus::Pending => "pending",
            EnvironmentStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnvironmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(EnvironmentStatus::Offline),
            "online" => Ok(EnvironmentStatus::Online),
            "pending" => Ok(EnvironmentStatus::Pending),
            "error" => Ok(EnvironmentStatus::Error),
            other => Err(format!("unknown environment status '{}'", other)),
        }
    }
}

/// How an environment is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// The Docker host this manager runs on.
    Local,
    /// Reachable over HTTP at its `api_url`.
    Direct,
    /// Reachable only through an agent-initiated outbound tunnel.
    Edge,
}

/// A managed Docker host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: String,
    pub name: String,
    /// Base URL for direct reachability. Ignored for local and edge.
    pub api_url: String,
    pub is_edge: bool,
    pub status: EnvironmentStatus,
    pub enabled: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Long-lived token presented to the agent. Never serialized.
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,
    pub api_key_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    pub fn is_local(&self) -> bool {
        is_local_id(&self.id)
    }

    pub fn topology(&self) -> Topology {
        if self.is_local() {
            Topology::Local
        } else if self.is_edge {
            Topology::Edge
        } else {
            Topology::Direct
        }
    }

    /// Joins `path` onto the environment's API URL.
    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.api_url, path)
    }
}

/// Joins a base URL and an absolute path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Tri-state update for nullable fields in a partial update.
///
/// - `Keep` = leave the stored value unchanged
/// - `Clear` = set the stored value to NULL
/// - `Set(value)` = replace the stored value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> FieldUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }

    /// Applies the update to an in-memory value.
    pub fn apply(self, target: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => *target = None,
            FieldUpdate::Set(value) => *target = Some(value),
        }
    }

    /// The value to write, or `None` for `Keep`. `Some(None)` means clear.
    pub fn as_write(&self) -> Option<Option<&T>> {
        match self {
            FieldUpdate::Keep => None,
            FieldUpdate::Clear => Some(None),
            FieldUpdate::Set(value) => Some(Some(value)),
        }
    }
}

/// Typed partial update for an environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPatch {
    pub name: Option<String>,
    pub api_url: Option<String>,
    pub is_edge: Option<bool>,
    pub enabled: Option<bool>,
    pub status: Option<EnvironmentStatus>,
    pub last_seen: FieldUpdate<DateTime<Utc>>,
    pub access_token: FieldUpdate<String>,
    pub api_key_id: FieldUpdate<String>,
}

impl EnvironmentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.api_url.is_none()
            && self.is_edge.is_none()
            && self.enabled.is_none()
            && self.status.is_none()
            && self.last_seen.is_keep()
            && self.access_token.is_keep()
            && self.api_key_id.is_keep()
    }

    /// Applies the patch to an in-memory environment.
    pub fn apply_to(self, env: &mut Environment) {
        if let Some(name) = self.name {
            env.name = name;
        }
        if let Some(api_url) = self.api_url {
            env.api_url = api_url;
        }
        if let Some(is_edge) = self.is_edge {
            env.is_edge = is_edge;
        }
        if let Some(enabled) = self.enabled {
            env.enabled = enabled;
        }
        if let Some(status) = self.status {
            env.status = status;
        }
        self.last_seen.apply(&mut env.last_seen);
        self.access_token.apply(&mut env.access_token);
        self.api_key_id.apply(&mut env.api_key_id);
    }
}

/// Input for registering a new environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvironment {
    pub name: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub is_edge: bool,
    /// Issue an API key right away; the environment starts `pending`.
    #[serde(default)]
    pub issue_api_key: bool,
    /// Bootstrap token already agreed with the agent, if any.
    #[serde(default)]
    pub access_token: Option<String>,
}
