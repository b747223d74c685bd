//! Sync definition management and on-demand runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::{GitOpsError, Result};
use super::git::{validate_relative_path, GitClient, GitCredentials};
use super::model::{
    CreateSync, GitOpsSync, SyncPatch, SyncRunResult, SyncStatus, DEFAULT_BRANCH,
    DEFAULT_COMPOSE_PATH, DEFAULT_SYNC_INTERVAL_MINUTES,
};
use super::reconciler::GitOpsReconciler;
use super::schedule::next_due_at;
use super::store::GitOpsStore;
use crate::environment::store::EnvironmentStore;
use crate::projects::ProjectProvisioner;
use crate::secrets::Encryptor;

/// Last-run outcome of a sync plus its scheduling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub sync_id: String,
    pub project_id: Option<String>,
    pub auto_sync: bool,
    pub running: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
    pub last_sync_commit: Option<String>,
    /// `None` when auto-sync is off.
    pub next_sync_at: Option<DateTime<Utc>>,
}

pub struct SyncService {
    store: Arc<dyn GitOpsStore>,
    environments: Arc<dyn EnvironmentStore>,
    provisioner: Arc<dyn ProjectProvisioner>,
    reconciler: Arc<GitOpsReconciler>,
    git: Arc<dyn GitClient>,
    encryptor: Arc<dyn Encryptor>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn GitOpsStore>,
        environments: Arc<dyn EnvironmentStore>,
        provisioner: Arc<dyn ProjectProvisioner>,
        reconciler: Arc<GitOpsReconciler>,
        git: Arc<dyn GitClient>,
        encryptor: Arc<dyn Encryptor>,
    ) -> Self {
        Self {
            store,
            environments,
            provisioner,
            reconciler,
            git,
            encryptor,
        }
    }

    pub fn create(&self, input: CreateSync) -> Result<GitOpsSync> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(GitOpsError::Validation(
                "sync name must not be empty".to_string(),
            ));
        }
        let branch = non_blank(input.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        let compose_path =
            non_blank(input.compose_path).unwrap_or_else(|| DEFAULT_COMPOSE_PATH.to_string());
        let sync_interval = input.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL_MINUTES);

        validate_definition(&branch, &compose_path, sync_interval)?;
        self.require_environment(&input.environment_id)?;
        self.require_repository(&input.repository_id)?;

        let now = Utc::now();
        let sync = GitOpsSync {
            id: uuid::Uuid::new_v4().to_string(),
            project_name: non_blank(input.project_name).unwrap_or_else(|| name.clone()),
            name,
            environment_id: input.environment_id,
            repository_id: input.repository_id,
            branch,
            compose_path,
            project_id: None,
            auto_sync: input.auto_sync,
            sync_interval,
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            last_sync_commit: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_sync(&sync)?;
        log::info!(
            "Created sync {} ({}:{} -> environment {})",
            sync.name,
            sync.branch,
            sync.compose_path,
            sync.environment_id
        );
        Ok(sync)
    }

    pub fn get(&self, id: &str) -> Result<GitOpsSync> {
        self.store
            .get_sync(id)?
            .ok_or_else(|| GitOpsError::SyncNotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<GitOpsSync>> {
        Ok(self.store.list_syncs()?)
    }

    /// Edits the definition. Last-run fields are untouched.
    pub fn update(&self, id: &str, patch: SyncPatch) -> Result<GitOpsSync> {
        let mut sync = self.get(id)?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(GitOpsError::Validation(
                    "sync name must not be empty".to_string(),
                ));
            }
            sync.name = name.trim().to_string();
        }
        if let Some(repository_id) = patch.repository_id {
            self.require_repository(&repository_id)?;
            sync.repository_id = repository_id;
        }
        if let Some(branch) = patch.branch {
            sync.branch = branch.trim().to_string();
        }
        if let Some(compose_path) = patch.compose_path {
            sync.compose_path = compose_path.trim().to_string();
        }
        if let Some(project_name) = patch.project_name {
            sync.project_name = project_name.trim().to_string();
        }
        if let Some(auto_sync) = patch.auto_sync {
            sync.auto_sync = auto_sync;
        }
        if let Some(interval) = patch.sync_interval {
            sync.sync_interval = interval;
        }
        validate_definition(&sync.branch, &sync.compose_path, sync.sync_interval)?;

        sync.updated_at = Utc::now();
        if !self.store.update_sync_definition(&sync)? {
            return Err(GitOpsError::SyncNotFound(id.to_string()));
        }
        Ok(sync)
    }

    /// Updates the definition and, when the change affects what or when a
    /// run fetches and auto-sync is on, runs it right away. The run outcome
    /// is recorded on the sync; the returned definition reflects it.
    pub async fn update_and_sync(
        &self,
        id: &str,
        patch: SyncPatch,
        cancel: &CancellationToken,
    ) -> Result<GitOpsSync> {
        let run_now = patch.affects_schedule_or_source();
        let sync = self.update(id, patch)?;
        if !(run_now && sync.auto_sync) {
            return Ok(sync);
        }

        match self.reconciler.perform_sync(id, cancel).await {
            Ok(result) => log::info!("Sync {} ran after update: {}", sync.name, result.message),
            Err(GitOpsError::AlreadyRunning(_)) => {
                log::debug!("Sync {} already running, update takes effect next run", id)
            }
            Err(e) => log::warn!("Sync {} failed after update: {}", sync.name, e),
        }
        self.get(id)
    }

    /// Runs the sync now, regardless of its schedule.
    pub async fn trigger(&self, id: &str, cancel: &CancellationToken) -> Result<SyncRunResult> {
        self.reconciler.perform_sync(id, cancel).await
    }

    /// Deletes the sync and releases its project. The project survives;
    /// only a back-reference still pointing at this sync is cleared.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _lease = self
            .reconciler
            .leases()
            .try_acquire(id)
            .ok_or_else(|| GitOpsError::AlreadyRunning(id.to_string()))?;

        let sync = self.get(id)?;
        if !self.store.delete_sync(id)? {
            return Err(GitOpsError::SyncNotFound(id.to_string()));
        }

        if let Some(project_id) = &sync.project_id {
            match self.provisioner.unlink_gitops_if(project_id, id).await {
                Ok(true) => log::debug!("Released project {} from sync {}", project_id, id),
                Ok(false) => log::debug!(
                    "Project {} no longer managed by sync {}, left as is",
                    project_id,
                    id
                ),
                Err(e) => log::warn!(
                    "Failed to release project {} from sync {}: {}",
                    project_id,
                    id,
                    e
                ),
            }
        }
        log::info!("Deleted sync {}", sync.name);
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<SyncStatusView> {
        let sync = self.get(id)?;
        Ok(SyncStatusView {
            running: self.reconciler.leases().is_held(&sync.id),
            next_sync_at: next_due_at(&sync),
            sync_id: sync.id,
            project_id: sync.project_id,
            auto_sync: sync.auto_sync,
            last_sync_at: sync.last_sync_at,
            last_sync_status: sync.last_sync_status,
            last_sync_error: sync.last_sync_error,
            last_sync_commit: sync.last_sync_commit,
        })
    }

    /// Clones the sync's branch and lists the files in the compose file's
    /// directory, recursively.
    pub async fn browse_files(&self, id: &str) -> Result<Vec<String>> {
        let sync = self.get(id)?;
        let repo = self.require_repository(&sync.repository_id)?;
        let creds = GitCredentials::from_repository(&repo, self.encryptor.as_ref())?;
        let timeout = self.reconciler.settings().git_timeout;

        let listing = async {
            let workspace = self.git.clone_repo(&repo.url, &sync.branch, &creds).await?;
            let files = self
                .git
                .list_files(&workspace, compose_dir(&sync.compose_path))
                .await?;
            if let Err(e) = workspace.cleanup() {
                log::warn!("Failed to remove browse workspace for sync {}: {}", id, e);
            }
            Ok::<_, GitOpsError>(files)
        };

        tokio::time::timeout(timeout, listing)
            .await
            .map_err(|_| GitOpsError::Timeout {
                operation: "git browse",
                timeout,
            })?
    }

    fn require_environment(&self, id: &str) -> Result<()> {
        match self.environments.get_by_id(id)? {
            Some(_) => Ok(()),
            None => Err(GitOpsError::EnvironmentNotFound(id.to_string())),
        }
    }

    fn require_repository(&self, id: &str) -> Result<super::model::GitRepository> {
        self.store
            .get_repository(id)?
            .ok_or_else(|| GitOpsError::RepositoryNotFound(id.to_string()))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_definition(branch: &str, compose_path: &str, sync_interval: u32) -> Result<()> {
    if branch.trim().is_empty() {
        return Err(GitOpsError::Validation(
            "branch must not be empty".to_string(),
        ));
    }
    if branch.starts_with('-') || branch.contains("..") {
        return Err(GitOpsError::Validation(format!(
            "invalid branch name '{}'",
            branch
        )));
    }
    validate_relative_path(compose_path)?;
    if sync_interval < 1 {
        return Err(GitOpsError::Validation(
            "sync interval must be at least 1 minute".to_string(),
        ));
    }
    Ok(())
}

/// Directory holding the compose file, `""` for the repository root.
fn compose_dir(compose_path: &str) -> &str {
    match compose_path.rfind('/') {
        Some(idx) => &compose_path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_definition() {
        assert!(validate_definition("main", "docker-compose.yml", 5).is_ok());
        assert!(validate_definition("release/1.2", "stacks/web/compose.yaml", 1).is_ok());
        assert!(validate_definition("", "docker-compose.yml", 5).is_err());
        assert!(validate_definition("--upload-pack=x", "docker-compose.yml", 5).is_err());
        assert!(matches!(
            validate_definition("main", "../compose.yaml", 5),
            Err(GitOpsError::PathTraversal(_))
        ));
        assert!(validate_definition("main", "docker-compose.yml", 0).is_err());
    }

    #[test]
    fn test_compose_dir() {
        assert_eq!(compose_dir("docker-compose.yml"), "");
        assert_eq!(compose_dir("stacks/web/compose.yaml"), "stacks/web");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ".to_string())), None);
        assert_eq!(non_blank(Some(" dev ".to_string())), Some("dev".to_string()));
        assert_eq!(non_blank(None), None);
    }
}
