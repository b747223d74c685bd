//! `docker compose` backed project provisioner.
//!
//! Local projects (environment `"0"`) live in `projects_dir/<name>/` and are
//! driven through the compose CLI. Remote projects are handed to the
//! environment's agent through the edge dispatcher, which picks direct HTTP
//! or the tunnel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::error::{ProjectError, Result};
use super::model::{Project, ProjectContent, ProjectDetails, ProjectStatus, ProjectUpdate};
use super::provisioner::ProjectProvisioner;
use super::store::ProjectStore;
use crate::audit::{event_types, AuditEvent, AuditSink, ResourceRef, Severity};
use crate::edge::{DispatchRequest, EdgeDispatcher};
use crate::environment::health::AGENT_TOKEN_HEADER;
use crate::environment::model::{is_local_id, Environment};
use crate::environment::store::EnvironmentStore;
use crate::sanitize::sanitize_project_name;

pub const COMPOSE_FILE_NAME: &str = "compose.yaml";
pub const ENV_FILE_NAME: &str = ".env";

/// Agent endpoint that writes and starts a compose project.
pub const REMOTE_DEPLOY_PATH: &str = "/api/projects/deploy";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDeployRequest<'a> {
    name: &'a str,
    compose: &'a str,
    env: Option<&'a str>,
    force_recreate: bool,
}

#[derive(Debug, Deserialize)]
struct RemoteStatus {
    running: usize,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "State", default)]
    state: String,
}

/// Checks that `content` is a YAML mapping with a `services` mapping.
pub fn validate_compose(content: &str) -> Result<()> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| ProjectError::InvalidCompose(e.to_string()))?;
    let mapping = doc
        .as_mapping()
        .ok_or_else(|| ProjectError::InvalidCompose("document is not a mapping".to_string()))?;
    match mapping.get("services") {
        Some(services) if services.is_mapping() => Ok(()),
        Some(_) => Err(ProjectError::InvalidCompose(
            "'services' must be a mapping".to_string(),
        )),
        None => Err(ProjectError::InvalidCompose(
            "missing 'services' section".to_string(),
        )),
    }
}

/// Counts `(running, total)` services from `docker compose ps --format json`.
/// Accepts both the JSON array and the one-object-per-line forms.
pub fn count_services(output: &str) -> std::result::Result<(usize, usize), String> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok((0, 0));
    }

    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| e.to_string())?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| e.to_string()))
            .collect::<std::result::Result<_, _>>()?
    };

    let running = entries
        .iter()
        .filter(|e| e.state.eq_ignore_ascii_case("running"))
        .count();
    Ok((running, entries.len()))
}

pub struct ComposeProvisioner {
    store: Arc<dyn ProjectStore>,
    environments: Arc<dyn EnvironmentStore>,
    dispatcher: Arc<EdgeDispatcher>,
    audit: Arc<dyn AuditSink>,
    projects_dir: PathBuf,
    docker_binary: String,
    timeout: Duration,
}

impl ComposeProvisioner {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        environments: Arc<dyn EnvironmentStore>,
        dispatcher: Arc<EdgeDispatcher>,
        audit: Arc<dyn AuditSink>,
        projects_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            environments,
            dispatcher,
            audit,
            projects_dir: projects_dir.into(),
            docker_binary: "docker".to_string(),
            timeout,
        }
    }

    pub fn with_docker_binary(mut self, binary: &str) -> Self {
        self.docker_binary = binary.to_string();
        self
    }

    fn require_project(&self, id: &str) -> Result<Project> {
        self.store
            .get_project(id)?
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    fn require_content(&self, id: &str) -> Result<ProjectContent> {
        self.store
            .get_project_content(id)?
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    fn require_environment(&self, id: &str) -> Result<Environment> {
        self.environments
            .get_by_id(id)?
            .ok_or_else(|| ProjectError::EnvironmentNotFound(id.to_string()))
    }

    async fn run_compose(&self, project: &Project, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.docker_binary);
        cmd.arg("compose")
            .args(["-p", project.name.as_str(), "-f", COMPOSE_FILE_NAME])
            .args(args)
            .current_dir(&project.path)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ProjectError::Deploy {
                project: project.name.clone(),
                reason: format!("docker compose timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| ProjectError::Deploy {
                project: project.name.clone(),
                reason: format!("failed to run {}: {}", self.docker_binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProjectError::Deploy {
                project: project.name.clone(),
                reason: if stderr.is_empty() {
                    format!(
                        "docker compose exited with code {}",
                        output.status.code().unwrap_or(-1)
                    )
                } else {
                    stderr
                },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn deploy_remote(
        &self,
        project: &Project,
        content: &ProjectContent,
        force_recreate: bool,
    ) -> Result<()> {
        let env = self.require_environment(&project.environment_id)?;
        let body = RemoteDeployRequest {
            name: &project.name,
            compose: &content.compose,
            env: content.env.as_deref(),
            force_recreate,
        };
        let mut request =
            DispatchRequest::post_json(&env.api_url, REMOTE_DEPLOY_PATH, &body, self.timeout)?;
        if let Some(token) = &env.access_token {
            request = request.header(AGENT_TOKEN_HEADER, token);
        }

        let response = self.dispatcher.dispatch_to(&env, request).await?;
        if !response.is_success() {
            return Err(ProjectError::Deploy {
                project: project.name.clone(),
                reason: format!("agent returned HTTP {}: {}", response.status, response.error_text()),
            });
        }
        Ok(())
    }

    async fn start(&self, id: &str, actor: &str, force_recreate: bool) -> Result<()> {
        let project = self.require_project(id)?;

        if is_local_id(&project.environment_id) {
            let mut args = vec!["up", "-d"];
            if force_recreate {
                args.extend(["--force-recreate", "--remove-orphans"]);
            }
            self.run_compose(&project, &args).await?;
        } else {
            let content = self.require_content(id)?;
            self.deploy_remote(&project, &content, force_recreate).await?;
        }

        let verb = if force_recreate { "Redeployed" } else { "Deployed" };
        log::info!("{} project {} ({}) for {}", verb, project.name, project.id, actor);
        self.audit.record(
            AuditEvent::new(
                event_types::PROJECT_DEPLOYED,
                Severity::Info,
                format!("{} {}", verb, project.name),
            )
            .description(format!("triggered by {}", actor))
            .resource(ResourceRef::new("project", &project.id, Some(&project.name))),
        );
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| ProjectError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_project_files(dir: &Path, content: &ProjectContent) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| ProjectError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    write_file(&dir.join(COMPOSE_FILE_NAME), &content.compose)?;

    let env_path = dir.join(ENV_FILE_NAME);
    match &content.env {
        Some(env) => write_file(&env_path, env)?,
        None if env_path.exists() => {
            std::fs::remove_file(&env_path).map_err(|source| ProjectError::Io {
                path: env_path.clone(),
                source,
            })?;
        }
        None => {}
    }
    Ok(())
}

#[async_trait]
impl ProjectProvisioner for ComposeProvisioner {
    async fn create(
        &self,
        environment_id: &str,
        name: &str,
        compose: &str,
        env: Option<&str>,
        actor: &str,
    ) -> Result<Project> {
        let name = sanitize_project_name(name)
            .ok_or_else(|| ProjectError::InvalidName(name.to_string()))?;
        validate_compose(compose)?;
        self.require_environment(environment_id)?;

        if self.store.find_project_by_name(environment_id, &name)?.is_some() {
            return Err(ProjectError::AlreadyExists {
                environment_id: environment_id.to_string(),
                name,
            });
        }

        let content = ProjectContent {
            compose: compose.to_string(),
            env: env.map(str::to_string),
        };
        let path = if is_local_id(environment_id) {
            let dir = self.projects_dir.join(&name);
            write_project_files(&dir, &content)?;
            dir.to_string_lossy().into_owned()
        } else {
            String::new()
        };

        let now = Utc::now();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            environment_id: environment_id.to_string(),
            name,
            path,
            gitops_managed_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_project(&project, &content)?;

        log::info!(
            "Created project {} ({}) on environment {} for {}",
            project.name,
            project.id,
            environment_id,
            actor
        );
        Ok(project)
    }

    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<Project> {
        if let Some(compose) = &update.compose {
            validate_compose(compose)?;
        }
        let update = ProjectUpdate {
            name: match update.name {
                Some(name) => Some(
                    sanitize_project_name(&name).ok_or(ProjectError::InvalidName(name))?,
                ),
                None => None,
            },
            ..update
        };

        let project = self
            .store
            .update_project(id, &update, Utc::now())?
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))?;

        let touches_files = update.compose.is_some() || !update.env.is_keep();
        if touches_files && is_local_id(&project.environment_id) && !project.path.is_empty() {
            let content = self.require_content(id)?;
            write_project_files(Path::new(&project.path), &content)?;
        }
        Ok(project)
    }

    async fn get(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.store.get_project(id)?)
    }

    async fn get_content(&self, id: &str) -> Result<ProjectContent> {
        self.require_content(id)
    }

    async fn get_details(&self, id: &str) -> Result<ProjectDetails> {
        let project = self.require_project(id)?;

        let (running, total) = if is_local_id(&project.environment_id) {
            let output = self
                .run_compose(&project, &["ps", "--all", "--format", "json"])
                .await?;
            count_services(&output).map_err(|reason| ProjectError::Deploy {
                project: project.name.clone(),
                reason: format!("unreadable compose ps output: {}", reason),
            })?
        } else {
            let env = self.require_environment(&project.environment_id)?;
            let path = format!("/api/projects/{}/status", project.name);
            let mut request = DispatchRequest::get(&env.api_url, &path, self.timeout);
            if let Some(token) = &env.access_token {
                request = request.header(AGENT_TOKEN_HEADER, token);
            }
            let response = self.dispatcher.dispatch_to(&env, request).await?;
            if !response.is_success() {
                return Err(ProjectError::Deploy {
                    project: project.name.clone(),
                    reason: format!(
                        "agent returned HTTP {}: {}",
                        response.status,
                        response.error_text()
                    ),
                });
            }
            let status: RemoteStatus = response.json()?;
            (status.running, status.total)
        };

        Ok(ProjectDetails {
            id: project.id,
            name: project.name,
            status: ProjectStatus::from_counts(running, total),
            running_services: running,
            total_services: total,
        })
    }

    async fn deploy(&self, id: &str, actor: &str) -> Result<()> {
        self.start(id, actor, false).await
    }

    async fn redeploy(&self, id: &str, actor: &str) -> Result<()> {
        self.start(id, actor, true).await
    }

    async fn link_gitops(&self, id: &str, sync_id: &str) -> Result<()> {
        if !self.store.set_gitops_managed_by(id, sync_id, Utc::now())? {
            return Err(ProjectError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn unlink_gitops_if(&self, id: &str, sync_id: &str) -> Result<bool> {
        Ok(self.store.clear_gitops_managed_by_if(id, sync_id, Utc::now())?)
    }
}
