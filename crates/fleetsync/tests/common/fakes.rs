//! In-memory stand-ins for the collaborators the services consume.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::ExposeSecret;

use fleetsync::audit::{AuditEvent, AuditSink};
use fleetsync::docker::DockerEngine;
use fleetsync::edge::{TransportError, TunnelRegistry, TunnelRequest, TunnelResponse};
use fleetsync::environment::FieldUpdate;
use fleetsync::gitops::{GitClient, GitCredentials, GitOpsError, RemoteBranch, Workspace};
use fleetsync::projects::{
    Project, ProjectContent, ProjectDetails, ProjectError, ProjectProvisioner, ProjectStatus,
    ProjectUpdate,
};

/// Serves one in-memory repository. Every clone materialises the current
/// file set into a fresh [`Workspace`].
pub struct FakeGitClient {
    root: PathBuf,
    files: Mutex<HashMap<String, String>>,
    commit: Mutex<String>,
    clone_delay: Mutex<Option<Duration>>,
    clone_error: Mutex<Option<String>>,
    clones: AtomicUsize,
    last_creds_user: Mutex<Option<String>>,
    last_creds_token: Mutex<Option<String>>,
}

impl FakeGitClient {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            files: Mutex::new(HashMap::new()),
            commit: Mutex::new("0000000000000000000000000000000000000001".to_string()),
            clone_delay: Mutex::new(None),
            clone_error: Mutex::new(None),
            clones: AtomicUsize::new(0),
            last_creds_user: Mutex::new(None),
            last_creds_token: Mutex::new(None),
        }
    }

    pub fn set_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    pub fn remove_file(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    pub fn set_commit(&self, commit: &str) {
        *self.commit.lock().unwrap() = commit.to_string();
    }

    /// Makes every clone wait after the workspace is created.
    pub fn set_clone_delay(&self, delay: Option<Duration>) {
        *self.clone_delay.lock().unwrap() = delay;
    }

    pub fn fail_clones_with(&self, message: Option<&str>) {
        *self.clone_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn last_username(&self) -> Option<String> {
        self.last_creds_user.lock().unwrap().clone()
    }

    pub fn last_token(&self) -> Option<String> {
        self.last_creds_token.lock().unwrap().clone()
    }

    /// Workspaces still on disk.
    pub fn live_workspaces(&self) -> usize {
        std::fs::read_dir(&self.root)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GitClient for FakeGitClient {
    async fn clone_repo(
        &self,
        _url: &str,
        _branch: &str,
        creds: &GitCredentials,
    ) -> Result<Workspace, GitOpsError> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        *self.last_creds_user.lock().unwrap() = creds.username.clone();
        *self.last_creds_token.lock().unwrap() = creds
            .token
            .as_ref()
            .map(|t| t.expose_secret().to_string());

        let error = self.clone_error.lock().unwrap().clone();
        if let Some(message) = error {
            return Err(GitOpsError::GitNetworkError(message));
        }

        let workspace = Workspace::create(&self.root, "fake")?;
        let files = self.files.lock().unwrap().clone();
        for (path, content) in files {
            let full = workspace.path().join(&path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, content)?;
        }

        let delay = *self.clone_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(workspace)
    }

    async fn current_commit(&self, _workspace: &Workspace) -> Result<String, GitOpsError> {
        Ok(self.commit.lock().unwrap().clone())
    }

    async fn ls_remote(
        &self,
        _url: &str,
        _creds: &GitCredentials,
    ) -> Result<Vec<RemoteBranch>, GitOpsError> {
        Ok(vec![RemoteBranch {
            name: "main".to_string(),
            commit: self.commit.lock().unwrap().clone(),
        }])
    }
}

#[derive(Debug, Clone)]
pub struct FakeProject {
    pub project: Project,
    pub content: ProjectContent,
    pub deploys: usize,
    pub redeploys: usize,
}

/// Keeps projects in memory and counts deploys. Every project reports
/// the same configurable status.
pub struct FakeProvisioner {
    projects: Mutex<HashMap<String, FakeProject>>,
    status: Mutex<ProjectStatus>,
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
            status: Mutex::new(ProjectStatus::Running),
        }
    }
}

impl FakeProvisioner {
    pub fn set_status(&self, status: ProjectStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn project(&self, id: &str) -> Option<FakeProject> {
        self.projects.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.projects.lock().unwrap().len()
    }

    pub fn total_redeploys(&self) -> usize {
        self.projects
            .lock()
            .unwrap()
            .values()
            .map(|p| p.redeploys)
            .sum()
    }

    pub fn remove(&self, id: &str) {
        self.projects.lock().unwrap().remove(id);
    }

    /// Points the back-reference somewhere else, as another sync would.
    pub fn repoint(&self, id: &str, sync_id: &str) {
        if let Some(p) = self.projects.lock().unwrap().get_mut(id) {
            p.project.gitops_managed_by = Some(sync_id.to_string());
        }
    }

    fn with_project<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut FakeProject) -> T,
    ) -> Result<T, ProjectError> {
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))?;
        Ok(f(project))
    }
}

#[async_trait]
impl ProjectProvisioner for FakeProvisioner {
    async fn create(
        &self,
        environment_id: &str,
        name: &str,
        compose: &str,
        env: Option<&str>,
        _actor: &str,
    ) -> Result<Project, ProjectError> {
        let mut projects = self.projects.lock().unwrap();
        if projects
            .values()
            .any(|p| p.project.environment_id == environment_id && p.project.name == name)
        {
            return Err(ProjectError::AlreadyExists {
                environment_id: environment_id.to_string(),
                name: name.to_string(),
            });
        }

        let now = Utc::now();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            environment_id: environment_id.to_string(),
            name: name.to_string(),
            path: format!("/projects/{}", name),
            gitops_managed_by: None,
            created_at: now,
            updated_at: now,
        };
        projects.insert(
            project.id.clone(),
            FakeProject {
                project: project.clone(),
                content: ProjectContent {
                    compose: compose.to_string(),
                    env: env.map(str::to_string),
                },
                deploys: 0,
                redeploys: 0,
            },
        );
        Ok(project)
    }

    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<Project, ProjectError> {
        self.with_project(id, |p| {
            if let Some(name) = update.name {
                p.project.name = name;
            }
            if let Some(compose) = update.compose {
                p.content.compose = compose;
            }
            match update.env {
                FieldUpdate::Keep => {}
                FieldUpdate::Clear => p.content.env = None,
                FieldUpdate::Set(env) => p.content.env = Some(env),
            }
            p.project.updated_at = Utc::now();
            p.project.clone()
        })
    }

    async fn get(&self, id: &str) -> Result<Option<Project>, ProjectError> {
        Ok(self.project(id).map(|p| p.project))
    }

    async fn get_content(&self, id: &str) -> Result<ProjectContent, ProjectError> {
        self.with_project(id, |p| p.content.clone())
    }

    async fn get_details(&self, id: &str) -> Result<ProjectDetails, ProjectError> {
        let status = *self.status.lock().unwrap();
        self.with_project(id, |p| ProjectDetails {
            id: p.project.id.clone(),
            name: p.project.name.clone(),
            status,
            running_services: usize::from(status.is_active()),
            total_services: 1,
        })
    }

    async fn deploy(&self, id: &str, _actor: &str) -> Result<(), ProjectError> {
        self.with_project(id, |p| p.deploys += 1)
    }

    async fn redeploy(&self, id: &str, _actor: &str) -> Result<(), ProjectError> {
        self.with_project(id, |p| p.redeploys += 1)
    }

    async fn link_gitops(&self, id: &str, sync_id: &str) -> Result<(), ProjectError> {
        self.with_project(id, |p| {
            p.project.gitops_managed_by = Some(sync_id.to_string())
        })
    }

    async fn unlink_gitops_if(&self, id: &str, sync_id: &str) -> Result<bool, ProjectError> {
        let mut projects = self.projects.lock().unwrap();
        match projects.get_mut(id) {
            Some(p) if p.project.gitops_managed_by.as_deref() == Some(sync_id) => {
                p.project.gitops_managed_by = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Tunnel registry with a fixed set of connected environments and a canned
/// reply.
pub struct FakeTunnelRegistry {
    connected: Mutex<HashSet<String>>,
    reply: Mutex<TunnelResponse>,
    sent: Mutex<Vec<(String, TunnelRequest)>>,
}

impl Default for FakeTunnelRegistry {
    fn default() -> Self {
        Self {
            connected: Mutex::new(HashSet::new()),
            reply: Mutex::new(TunnelResponse {
                status: 200,
                body: br#"{"status":"ok"}"#.to_vec(),
            }),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTunnelRegistry {
    pub fn connect(&self, env_id: &str) {
        self.connected.lock().unwrap().insert(env_id.to_string());
    }

    pub fn disconnect(&self, env_id: &str) {
        self.connected.lock().unwrap().remove(env_id);
    }

    pub fn set_reply(&self, status: u16, body: &[u8]) {
        *self.reply.lock().unwrap() = TunnelResponse {
            status,
            body: body.to_vec(),
        };
    }

    pub fn sent(&self) -> Vec<(String, TunnelRequest)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelRegistry for FakeTunnelRegistry {
    fn has_active_tunnel(&self, env_id: &str) -> bool {
        self.connected.lock().unwrap().contains(env_id)
    }

    async fn send(
        &self,
        env_id: &str,
        request: TunnelRequest,
    ) -> Result<TunnelResponse, TransportError> {
        if !self.has_active_tunnel(env_id) {
            return Err(TransportError::NotConnected {
                env_id: env_id.to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((env_id.to_string(), request));
        Ok(self.reply.lock().unwrap().clone())
    }
}

pub struct FakeDockerEngine {
    healthy: AtomicBool,
    pings: AtomicUsize,
}

impl Default for FakeDockerEngine {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
        }
    }
}

impl FakeDockerEngine {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DockerEngine for FakeDockerEngine {
    async fn ping(&self, _timeout: Duration) -> Result<(), String> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("Cannot connect to the Docker daemon".to_string())
        }
    }
}

#[derive(Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
