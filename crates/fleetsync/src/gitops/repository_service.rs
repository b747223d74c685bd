//! Git repository registration and credential storage.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use regex::Regex;

use super::error::{GitOpsError, Result};
use super::git::{GitClient, GitCredentials, RemoteBranch};
use super::model::{CreateRepository, GitAuthType, GitRepository, RepositoryPatch};
use super::store::{GitOpsStore, RepositoryDeletion};
use crate::db::DatabaseError;
use crate::environment::model::FieldUpdate;
use crate::sanitize::redact_url;
use crate::secrets::Encryptor;

fn scp_like_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^/].*$").expect("static regex"))
}

/// Accepts `http(s)://`, `ssh://`, `git://`, `file://` and scp-style
/// `user@host:path` remotes.
pub fn validate_repository_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(GitOpsError::Validation(
            "repository URL must not be empty".to_string(),
        ));
    }
    if scp_like_url().is_match(url) {
        return Ok(());
    }
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "ssh" | "git" | "file") => {
            Ok(())
        }
        Ok(parsed) => Err(GitOpsError::Validation(format!(
            "unsupported repository URL scheme '{}'",
            parsed.scheme()
        ))),
        Err(e) => Err(GitOpsError::Validation(format!(
            "invalid repository URL '{}': {}",
            redact_url(url),
            e
        ))),
    }
}

pub struct RepositoryService {
    store: Arc<dyn GitOpsStore>,
    encryptor: Arc<dyn Encryptor>,
    git: Arc<dyn GitClient>,
}

impl RepositoryService {
    pub fn new(
        store: Arc<dyn GitOpsStore>,
        encryptor: Arc<dyn Encryptor>,
        git: Arc<dyn GitClient>,
    ) -> Self {
        Self {
            store,
            encryptor,
            git,
        }
    }

    pub fn create(&self, input: CreateRepository) -> Result<GitRepository> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(GitOpsError::Validation(
                "repository name must not be empty".to_string(),
            ));
        }
        validate_repository_url(&input.url)?;
        check_auth(input.auth_type, input.token.is_some(), input.ssh_key.is_some())?;

        let encrypted_token = match (input.auth_type, &input.token) {
            (GitAuthType::Http, Some(token)) => Some(self.encryptor.encrypt(token)?),
            _ => None,
        };
        let encrypted_ssh_key = match (input.auth_type, &input.ssh_key) {
            (GitAuthType::Ssh, Some(key)) => Some(self.encryptor.encrypt(key)?),
            _ => None,
        };

        let now = Utc::now();
        let repo = GitRepository {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: input.url.trim().to_string(),
            auth_type: input.auth_type,
            username: input.username.filter(|u| !u.trim().is_empty()),
            encrypted_token,
            encrypted_ssh_key,
            host_key_policy: input.host_key_policy,
            description: input.description,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_repository(&repo)
            .map_err(|e| name_conflict(e, &repo.name))?;
        log::info!("Registered repository {} ({})", repo.name, redact_url(&repo.url));
        Ok(repo)
    }

    pub fn get(&self, id: &str) -> Result<GitRepository> {
        self.store
            .get_repository(id)?
            .ok_or_else(|| GitOpsError::RepositoryNotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<GitRepository>> {
        Ok(self.store.list_repositories()?)
    }

    /// Applies a partial update. Secrets are re-encrypted only when the
    /// patch replaces them; switching auth type drops the secret that no
    /// longer applies.
    pub fn update(&self, id: &str, patch: RepositoryPatch) -> Result<GitRepository> {
        let mut repo = self.get(id)?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(GitOpsError::Validation(
                    "repository name must not be empty".to_string(),
                ));
            }
            repo.name = name.trim().to_string();
        }
        if let Some(url) = patch.url {
            validate_repository_url(&url)?;
            repo.url = url.trim().to_string();
        }
        if let Some(auth_type) = patch.auth_type {
            repo.auth_type = auth_type;
        }
        patch.username.apply(&mut repo.username);
        patch.description.apply(&mut repo.description);
        if let Some(policy) = patch.host_key_policy {
            repo.host_key_policy = policy;
        }
        if let Some(enabled) = patch.enabled {
            repo.enabled = enabled;
        }

        match patch.token {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => repo.encrypted_token = None,
            FieldUpdate::Set(token) => repo.encrypted_token = Some(self.encryptor.encrypt(&token)?),
        }
        match patch.ssh_key {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => repo.encrypted_ssh_key = None,
            FieldUpdate::Set(key) => repo.encrypted_ssh_key = Some(self.encryptor.encrypt(&key)?),
        }
        match repo.auth_type {
            GitAuthType::None => {
                repo.encrypted_token = None;
                repo.encrypted_ssh_key = None;
            }
            GitAuthType::Http => repo.encrypted_ssh_key = None,
            GitAuthType::Ssh => repo.encrypted_token = None,
        }
        check_auth(
            repo.auth_type,
            repo.encrypted_token.is_some(),
            repo.encrypted_ssh_key.is_some(),
        )?;

        repo.updated_at = Utc::now();
        if !self
            .store
            .update_repository(&repo)
            .map_err(|e| name_conflict(e, &repo.name))?
        {
            return Err(GitOpsError::RepositoryNotFound(id.to_string()));
        }
        Ok(repo)
    }

    /// Deletes a repository no sync references.
    pub fn delete(&self, id: &str) -> Result<()> {
        match self.store.delete_repository_if_unused(id)? {
            RepositoryDeletion::Deleted => {
                log::info!("Deleted repository {}", id);
                Ok(())
            }
            RepositoryDeletion::NotFound => Err(GitOpsError::RepositoryNotFound(id.to_string())),
            RepositoryDeletion::InUse(count) => Err(GitOpsError::RepositoryInUse { count }),
        }
    }

    /// Lists the remote's branches with the stored credentials.
    pub async fn test_connection(&self, id: &str) -> Result<Vec<RemoteBranch>> {
        let repo = self.get(id)?;
        let creds = GitCredentials::from_repository(&repo, self.encryptor.as_ref())?;
        self.git.ls_remote(&repo.url, &creds).await
    }
}

fn name_conflict(err: DatabaseError, name: &str) -> GitOpsError {
    if err.is_unique_violation() {
        GitOpsError::Validation(format!("a repository named '{}' already exists", name))
    } else {
        err.into()
    }
}

fn check_auth(auth_type: GitAuthType, has_token: bool, has_ssh_key: bool) -> Result<()> {
    match auth_type {
        GitAuthType::Http if !has_token => Err(GitOpsError::Validation(
            "HTTP authentication requires a token".to_string(),
        )),
        GitAuthType::Ssh if !has_ssh_key => Err(GitOpsError::Validation(
            "SSH authentication requires a private key".to_string(),
        )),
        _ => Ok(()),
    }
}
