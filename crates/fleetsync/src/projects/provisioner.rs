//! Deployment capability consumed by the GitOps reconciler.

use async_trait::async_trait;

use super::error::Result;
use super::model::{Project, ProjectContent, ProjectDetails, ProjectUpdate};

/// Creates, updates and deploys compose projects on an environment.
///
/// `actor` names who triggered the action and ends up in logs and audit
/// events.
#[async_trait]
pub trait ProjectProvisioner: Send + Sync {
    async fn create(
        &self,
        environment_id: &str,
        name: &str,
        compose: &str,
        env: Option<&str>,
        actor: &str,
    ) -> Result<Project>;

    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<Project>;

    /// `Ok(None)` when the project no longer exists.
    async fn get(&self, id: &str) -> Result<Option<Project>>;

    async fn get_content(&self, id: &str) -> Result<ProjectContent>;

    async fn get_details(&self, id: &str) -> Result<ProjectDetails>;

    async fn deploy(&self, id: &str, actor: &str) -> Result<()>;

    async fn redeploy(&self, id: &str, actor: &str) -> Result<()>;

    /// Points the project's `gitops_managed_by` back-reference at `sync_id`.
    async fn link_gitops(&self, id: &str, sync_id: &str) -> Result<()>;

    /// Clears the back-reference only while it still equals `sync_id`.
    /// Returns whether it was cleared.
    async fn unlink_gitops_if(&self, id: &str, sync_id: &str) -> Result<bool>;
}
