//! GitOps reconciliation: clone, diff and apply one sync, or sweep every
//! due sync.
//!
//! A run goes through these steps:
//!
//! 1. check the environment and repository are usable
//! 2. clone the branch into a scratch workspace under the git deadline
//! 3. require the compose file, read it and an optional sibling `.env`
//! 4. create and deploy the project on first run, otherwise update its
//!    content and redeploy only when the content changed and the project
//!    is running
//! 5. record the outcome on the sync and emit an audit event
//!
//! Runs of the same sync never overlap: every run holds a lease from [`SyncLeases`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::{GitOpsError, Result};
use super::git::{sibling_env_path, validate_relative_path, GitClient, GitCredentials};
use super::lease::SyncLeases;
use super::model::{GitOpsSync, SweepReport, SyncResultRecord, SyncRunResult, SyncStatus};
use super::schedule::is_due;
use super::store::GitOpsStore;
use crate::audit::{event_types, AuditEvent, AuditSink, ResourceRef, Severity};
use crate::environment::model::FieldUpdate;
use crate::environment::store::EnvironmentStore;
use crate::projects::{ProjectProvisioner, ProjectUpdate};
use crate::sanitize::redact_url;
use crate::secrets::Encryptor;

/// Actor recorded on projects created or deployed by a sync.
pub const GITOPS_ACTOR: &str = "gitops-sync";

/// Tunables for runs and sweeps.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerSettings {
    /// Deadline for fetching one sync's sources (clone and reads).
    pub git_timeout: Duration,
    pub drift_buffer: Duration,
    /// Upper bound on runs executing at once during a sweep.
    pub max_concurrent: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            git_timeout: Duration::from_secs(300),
            drift_buffer: Duration::from_secs(30),
            max_concurrent: 1,
        }
    }
}

/// Compose sources read from one checkout.
#[derive(Debug, Clone)]
struct FetchedSource {
    compose: String,
    env: Option<String>,
    commit: Option<String>,
}

enum SweepOutcome {
    Succeeded,
    Failed,
    Busy,
    Skipped,
}

pub struct GitOpsReconciler {
    store: Arc<dyn GitOpsStore>,
    environments: Arc<dyn EnvironmentStore>,
    git: Arc<dyn GitClient>,
    provisioner: Arc<dyn ProjectProvisioner>,
    encryptor: Arc<dyn Encryptor>,
    audit: Arc<dyn AuditSink>,
    leases: SyncLeases,
    settings: ReconcilerSettings,
}

impl GitOpsReconciler {
    pub fn new(
        store: Arc<dyn GitOpsStore>,
        environments: Arc<dyn EnvironmentStore>,
        git: Arc<dyn GitClient>,
        provisioner: Arc<dyn ProjectProvisioner>,
        encryptor: Arc<dyn Encryptor>,
        audit: Arc<dyn AuditSink>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            environments,
            git,
            provisioner,
            encryptor,
            audit,
            leases: SyncLeases::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Leases shared with anything that must not overlap a run, such as
    /// deleting a sync.
    pub fn leases(&self) -> &SyncLeases {
        &self.leases
    }

    /// Runs one sync now. Fails with [`GitOpsError::AlreadyRunning`] while
    /// another run of the same sync is in flight.
    pub async fn perform_sync(
        &self,
        sync_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncRunResult> {
        let _lease = self
            .leases
            .try_acquire(sync_id)
            .ok_or_else(|| GitOpsError::AlreadyRunning(sync_id.to_string()))?;
        self.run_leased(sync_id, cancel).await
    }

    /// One sweep over every auto-sync definition: due ones run through a
    /// bounded pool; ones already running elsewhere are skipped. A failing
    /// sync never stops the sweep.
    pub async fn sync_all_enabled(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let candidates = self.store.list_auto_syncs()?;
        let now = Utc::now();
        let due: Vec<GitOpsSync> = candidates
            .iter()
            .filter(|sync| is_due(sync, now, self.settings.drift_buffer))
            .cloned()
            .collect();

        let mut report = SweepReport {
            considered: candidates.len(),
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        log::info!(
            "GitOps sweep: {} of {} auto-sync definition(s) due",
            report.due,
            report.considered
        );

        let outcomes: Vec<SweepOutcome> = stream::iter(due)
            .map(|sync| async move {
                if cancel.is_cancelled() {
                    return SweepOutcome::Skipped;
                }
                let Some(_lease) = self.leases.try_acquire(&sync.id) else {
                    log::debug!("Sync {} already running, skipping", sync.id);
                    return SweepOutcome::Busy;
                };
                match self.run_leased(&sync.id, cancel).await {
                    Ok(_) => SweepOutcome::Succeeded,
                    Err(_) => SweepOutcome::Failed,
                }
            })
            .buffer_unordered(self.settings.max_concurrent.max(1))
            .collect::<Vec<_>>()
            .instrument(tracing::info_span!("gitops_sweep", due = report.due))
            .await;

        for outcome in outcomes {
            match outcome {
                SweepOutcome::Succeeded => report.succeeded += 1,
                SweepOutcome::Failed => report.failed += 1,
                SweepOutcome::Busy => report.skipped_busy += 1,
                SweepOutcome::Skipped => {}
            }
        }

        log::info!(
            "GitOps sweep finished: {} succeeded, {} failed, {} busy",
            report.succeeded,
            report.failed,
            report.skipped_busy
        );
        Ok(report)
    }

    async fn run_leased(&self, sync_id: &str, cancel: &CancellationToken) -> Result<SyncRunResult> {
        let sync = self
            .store
            .get_sync(sync_id)?
            .ok_or_else(|| GitOpsError::SyncNotFound(sync_id.to_string()))?;

        // Dropping `execute` on cancellation drops its workspace too.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GitOpsError::Cancelled),
            result = self.execute(&sync) => result,
        };

        self.record_outcome(&sync, &outcome);
        outcome
    }

    async fn execute(&self, sync: &GitOpsSync) -> Result<SyncRunResult> {
        let env = self
            .environments
            .get_by_id(&sync.environment_id)?
            .ok_or_else(|| GitOpsError::EnvironmentNotFound(sync.environment_id.clone()))?;
        if !env.enabled {
            return Err(GitOpsError::EnvironmentDisabled(env.id));
        }
        let repo = self
            .store
            .get_repository(&sync.repository_id)?
            .ok_or_else(|| GitOpsError::RepositoryNotFound(sync.repository_id.clone()))?;
        if !repo.enabled {
            return Err(GitOpsError::RepositoryDisabled(repo.id));
        }
        validate_relative_path(&sync.compose_path)?;

        let creds = GitCredentials::from_repository(&repo, self.encryptor.as_ref())?;
        log::info!(
            "Syncing {} from {} ({}:{})",
            sync.name,
            redact_url(&repo.url),
            sync.branch,
            sync.compose_path
        );

        let source = tokio::time::timeout(
            self.settings.git_timeout,
            self.fetch(&repo.url, sync, &creds),
        )
        .await
        .map_err(|_| GitOpsError::Timeout {
            operation: "git fetch",
            timeout: self.settings.git_timeout,
        })??;

        self.apply(sync, source).await
    }

    /// Clones and reads the sources. The workspace never outlives this call.
    async fn fetch(
        &self,
        url: &str,
        sync: &GitOpsSync,
        creds: &GitCredentials,
    ) -> Result<FetchedSource> {
        let workspace = self.git.clone_repo(url, &sync.branch, creds).await?;

        if !self.git.file_exists(&workspace, &sync.compose_path).await? {
            return Err(GitOpsError::ComposeNotFound {
                path: sync.compose_path.clone(),
                branch: sync.branch.clone(),
            });
        }
        let compose = self.git.read_file(&workspace, &sync.compose_path).await?;

        let env_path = sibling_env_path(&sync.compose_path);
        let env = if self.git.file_exists(&workspace, &env_path).await? {
            Some(self.git.read_file(&workspace, &env_path).await?)
        } else {
            None
        };

        let commit = match self.git.current_commit(&workspace).await {
            Ok(commit) => Some(commit),
            Err(e) => {
                log::warn!("Could not resolve commit for sync {}: {}", sync.id, e);
                None
            }
        };

        if let Err(e) = workspace.cleanup() {
            log::warn!("Failed to remove workspace for sync {}: {}", sync.id, e);
        }

        Ok(FetchedSource {
            compose,
            env,
            commit,
        })
    }

    async fn apply(&self, sync: &GitOpsSync, source: FetchedSource) -> Result<SyncRunResult> {
        let existing = match &sync.project_id {
            Some(project_id) => self.provisioner.get(project_id).await?,
            None => None,
        };

        let Some(project) = existing else {
            if let Some(stale) = &sync.project_id {
                log::warn!(
                    "Project {} bound to sync {} no longer exists, creating a new one",
                    stale,
                    sync.id
                );
            }
            let project = self
                .provisioner
                .create(
                    &sync.environment_id,
                    sync.effective_project_name(),
                    &source.compose,
                    source.env.as_deref(),
                    GITOPS_ACTOR,
                )
                .await?;
            self.store.set_sync_project(&sync.id, &project.id, Utc::now())?;
            self.provisioner.link_gitops(&project.id, &sync.id).await?;
            self.provisioner.deploy(&project.id, GITOPS_ACTOR).await?;

            return Ok(SyncRunResult {
                sync_id: sync.id.clone(),
                project_id: project.id,
                commit: source.commit,
                created_project: true,
                content_changed: true,
                redeployed: false,
                message: format!("created and deployed project {}", project.name),
            });
        };

        let current = self.provisioner.get_content(&project.id).await?;
        let changed = current.differs_from(&source.compose, source.env.as_deref());

        self.provisioner
            .update(
                &project.id,
                ProjectUpdate {
                    name: None,
                    compose: Some(source.compose),
                    env: match source.env {
                        Some(env) => FieldUpdate::Set(env),
                        None => FieldUpdate::Clear,
                    },
                },
            )
            .await?;

        let mut redeployed = false;
        if changed {
            let details = self.provisioner.get_details(&project.id).await?;
            if details.status.is_active() {
                self.provisioner.redeploy(&project.id, GITOPS_ACTOR).await?;
                redeployed = true;
            } else {
                log::info!(
                    "Project {} is {}, content updated without redeploy",
                    project.name,
                    details.status.as_str()
                );
            }
        }

        let message = match (changed, redeployed) {
            (false, _) => "no changes".to_string(),
            (true, true) => format!("updated and redeployed project {}", project.name),
            (true, false) => format!("updated project {}", project.name),
        };
        Ok(SyncRunResult {
            sync_id: sync.id.clone(),
            project_id: project.id,
            commit: source.commit,
            created_project: false,
            content_changed: changed,
            redeployed,
            message,
        })
    }

    fn record_outcome(&self, sync: &GitOpsSync, outcome: &Result<SyncRunResult>) {
        let now = Utc::now();
        let resource = ResourceRef::new("gitops_sync", &sync.id, Some(&sync.name));

        let (record, event) = match outcome {
            Ok(result) => {
                log::info!("Sync {} succeeded: {}", sync.name, result.message);
                (
                    SyncResultRecord {
                        at: now,
                        status: SyncStatus::Success,
                        error: None,
                        commit: result.commit.clone(),
                    },
                    AuditEvent::new(
                        event_types::GITOPS_SYNC_SUCCESS,
                        Severity::Success,
                        format!("Sync {} succeeded", sync.name),
                    )
                    .description(result.message.clone()),
                )
            }
            Err(e) => {
                log::warn!("Sync {} failed: {}", sync.name, e);
                (
                    SyncResultRecord {
                        at: now,
                        status: SyncStatus::Failed,
                        error: Some(e.to_string()),
                        commit: None,
                    },
                    AuditEvent::new(
                        event_types::GITOPS_SYNC_FAILED,
                        Severity::Error,
                        format!("Sync {} failed", sync.name),
                    )
                    .description(e.to_string()),
                )
            }
        };

        if let Err(e) = self.store.record_sync_result(&sync.id, &record) {
            log::error!("Failed to record result of sync {}: {}", sync.id, e);
        }
        self.audit.record(event.resource(resource));
    }
}
