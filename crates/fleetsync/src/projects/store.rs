//! Persistence contract for compose projects.

use chrono::{DateTime, Utc};

use super::model::{Project, ProjectContent, ProjectUpdate};
use crate::db::DatabaseError;

pub trait ProjectStore: Send + Sync {
    fn create_project(&self, project: &Project, content: &ProjectContent)
        -> Result<(), DatabaseError>;

    fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError>;

    fn find_project_by_name(
        &self,
        environment_id: &str,
        name: &str,
    ) -> Result<Option<Project>, DatabaseError>;

    fn list_projects(&self, environment_id: &str) -> Result<Vec<Project>, DatabaseError>;

    fn get_project_content(&self, id: &str) -> Result<Option<ProjectContent>, DatabaseError>;

    /// Applies name/content changes. Returns the updated project, or `None`
    /// when it does not exist.
    fn update_project(
        &self,
        id: &str,
        update: &ProjectUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Project>, DatabaseError>;

    fn set_gitops_managed_by(
        &self,
        id: &str,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Clears the back-reference only if it still equals `sync_id`.
    fn clear_gitops_managed_by_if(
        &self,
        id: &str,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    fn delete_project(&self, id: &str) -> Result<bool, DatabaseError>;
}
