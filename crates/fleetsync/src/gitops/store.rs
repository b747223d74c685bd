//! Persistence contract for repositories and sync definitions.

use chrono::{DateTime, Utc};

use super::model::{GitOpsSync, GitRepository, SyncResultRecord};
use crate::db::DatabaseError;

/// Result of a guarded repository delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryDeletion {
    Deleted,
    NotFound,
    /// Still referenced by this many syncs; nothing was removed.
    InUse(u64),
}

pub trait GitOpsStore: Send + Sync {
    fn create_repository(&self, repo: &GitRepository) -> Result<(), DatabaseError>;

    fn get_repository(&self, id: &str) -> Result<Option<GitRepository>, DatabaseError>;

    fn list_repositories(&self) -> Result<Vec<GitRepository>, DatabaseError>;

    /// Overwrites every mutable column of the repository.
    fn update_repository(&self, repo: &GitRepository) -> Result<bool, DatabaseError>;

    /// Counts references and deletes in one transaction, so a sync created
    /// concurrently cannot slip in between the check and the delete.
    fn delete_repository_if_unused(&self, id: &str) -> Result<RepositoryDeletion, DatabaseError>;

    fn create_sync(&self, sync: &GitOpsSync) -> Result<(), DatabaseError>;

    fn get_sync(&self, id: &str) -> Result<Option<GitOpsSync>, DatabaseError>;

    fn list_syncs(&self) -> Result<Vec<GitOpsSync>, DatabaseError>;

    /// Syncs with `auto_sync` on whose environment and repository are both
    /// enabled.
    fn list_auto_syncs(&self) -> Result<Vec<GitOpsSync>, DatabaseError>;

    /// Writes the definition columns (name, repository, branch, path,
    /// project name, schedule). Last-run columns are left alone.
    fn update_sync_definition(&self, sync: &GitOpsSync) -> Result<bool, DatabaseError>;

    fn set_sync_project(
        &self,
        id: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Persists a run outcome. `record.commit: None` keeps the stored commit.
    fn record_sync_result(&self, id: &str, record: &SyncResultRecord)
        -> Result<bool, DatabaseError>;

    fn delete_sync(&self, id: &str) -> Result<bool, DatabaseError>;

    fn count_syncs_for_repository(&self, repository_id: &str) -> Result<u64, DatabaseError>;

    fn count_syncs_for_environment(&self, environment_id: &str) -> Result<u64, DatabaseError>;
}
