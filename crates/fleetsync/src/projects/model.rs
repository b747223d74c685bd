//! Compose project data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::model::FieldUpdate;

/// Aggregate runtime state derived from live service counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Running,
    PartiallyRunning,
    Stopped,
    Unknown,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Running => "running",
            ProjectStatus::PartiallyRunning => "partially_running",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Unknown => "unknown",
        }
    }

    /// Derives the project status from running/total service counts.
    pub fn from_counts(running: usize, total: usize) -> Self {
        match (running, total) {
            (_, 0) => ProjectStatus::Unknown,
            (0, _) => ProjectStatus::Stopped,
            (r, t) if r >= t => ProjectStatus::Running,
            _ => ProjectStatus::PartiallyRunning,
        }
    }

    /// Whether a content change should trigger a redeploy.
    pub fn is_active(&self) -> bool {
        matches!(self, ProjectStatus::Running | ProjectStatus::PartiallyRunning)
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ProjectStatus::Running),
            "partially_running" | "partially-running" => Ok(ProjectStatus::PartiallyRunning),
            "stopped" => Ok(ProjectStatus::Stopped),
            "unknown" => Ok(ProjectStatus::Unknown),
            other => Err(format!("unknown project status '{}'", other)),
        }
    }
}

/// A compose-based deployment unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub environment_id: String,
    pub name: String,
    /// Directory holding `compose.yaml` and `.env` for local projects.
    pub path: String,
    /// Sync that manages this project, if any. A back-reference, not ownership.
    pub gitops_managed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored compose and env file content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContent {
    pub compose: String,
    pub env: Option<String>,
}

impl ProjectContent {
    /// Byte-level comparison. A missing env file and an empty one are equal.
    pub fn differs_from(&self, compose: &str, env: Option<&str>) -> bool {
        let stored_env = self.env.as_deref().unwrap_or("");
        self.compose != compose || stored_env != env.unwrap_or("")
    }
}

/// Live details of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetails {
    pub id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub running_services: usize,
    pub total_services: usize,
}

/// Partial update for a project's name and content.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub compose: Option<String>,
    pub env: FieldUpdate<String>,
}
