//! GitOps: repositories, sync definitions and the reconciliation engine
//! that keeps projects in step with a branch.

pub mod error;
pub mod git;
pub mod lease;
pub mod model;
pub mod reconciler;
pub mod repository_service;
pub mod schedule;
pub mod store;
pub mod sync_scheduler;
pub mod sync_service;

pub use error::{GitOpsError, Result};
pub use git::{CliGitClient, GitClient, GitCredentials, RemoteBranch, Workspace};
pub use lease::{SyncLease, SyncLeases};
pub use model::{
    CreateRepository, CreateSync, GitAuthType, GitOpsSync, GitRepository, HostKeyPolicy,
    RepositoryPatch, SweepReport, SyncPatch, SyncRunResult, SyncStatus,
};
pub use reconciler::{GitOpsReconciler, ReconcilerSettings, GITOPS_ACTOR};
pub use repository_service::RepositoryService;
pub use store::{GitOpsStore, RepositoryDeletion};
pub use sync_scheduler::SyncScheduler;
pub use sync_service::{SyncService, SyncStatusView};
