//! Pushes this manager's registry and Git credentials to remote agents.

use std::sync::Arc;
use std::time::Duration;

use super::error::{CredentialError, Result};
use super::model::{
    CredentialSyncPayload, CredentialSyncResponse, PropagationReport, RegistryCredential,
    RepositoryCredential,
};
use super::store::RegistryStore;
use crate::audit::{event_types, AuditEvent, AuditSink, ResourceRef, Severity};
use crate::edge::{DispatchRequest, EdgeDispatcher};
use crate::environment::health::AGENT_TOKEN_HEADER;
use crate::environment::model::is_local_id;
use crate::environment::store::EnvironmentStore;
use crate::gitops::model::{GitAuthType, GitRepository};
use crate::gitops::store::GitOpsStore;
use crate::secrets::Encryptor;

/// Agent endpoint accepting a batched credential payload.
pub const CREDENTIAL_SYNC_PATH: &str = "/api/credentials/sync";

/// Decrypted payload plus the IDs that could not be decrypted.
#[derive(Debug, Default)]
pub struct PreparedPayload {
    pub payload: CredentialSyncPayload,
    pub skipped: Vec<String>,
}

pub struct CredentialPropagator {
    environments: Arc<dyn EnvironmentStore>,
    registries: Arc<dyn RegistryStore>,
    repositories: Arc<dyn GitOpsStore>,
    encryptor: Arc<dyn Encryptor>,
    dispatcher: Arc<EdgeDispatcher>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl CredentialPropagator {
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        registries: Arc<dyn RegistryStore>,
        repositories: Arc<dyn GitOpsStore>,
        encryptor: Arc<dyn Encryptor>,
        dispatcher: Arc<EdgeDispatcher>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            environments,
            registries,
            repositories,
            encryptor,
            dispatcher,
            audit,
            timeout,
        }
    }

    /// Decrypts every enabled registry and repository credential. Items that
    /// fail to decrypt are left out and reported, never fatal.
    pub fn prepare_payload(&self) -> Result<PreparedPayload> {
        let mut prepared = PreparedPayload::default();

        for registry in self.registries.list_registries()? {
            if !registry.enabled {
                continue;
            }
            match self.encryptor.decrypt(&registry.encrypted_token) {
                Ok(token) => prepared.payload.registries.push(RegistryCredential {
                    id: registry.id,
                    url: registry.url,
                    username: registry.username,
                    token,
                    insecure: registry.insecure,
                    enabled: registry.enabled,
                }),
                Err(e) => {
                    log::warn!(
                        "Skipping registry {} ({}): cannot decrypt token: {}",
                        registry.url,
                        registry.id,
                        e
                    );
                    prepared.skipped.push(registry.id);
                }
            }
        }

        for repo in self.repositories.list_repositories()? {
            if !repo.enabled {
                continue;
            }
            match self.decrypt_repository(&repo) {
                Ok(credential) => prepared.payload.repositories.push(credential),
                Err(e) => {
                    log::warn!(
                        "Skipping repository {} ({}): cannot decrypt credentials: {}",
                        repo.name,
                        repo.id,
                        e
                    );
                    prepared.skipped.push(repo.id);
                }
            }
        }

        Ok(prepared)
    }

    fn decrypt_repository(&self, repo: &GitRepository) -> Result<RepositoryCredential> {
        let decrypt = |value: &Option<String>| -> Result<Option<String>> {
            value
                .as_deref()
                .map(|v| self.encryptor.decrypt(v))
                .transpose()
                .map_err(CredentialError::from)
        };

        let (token, ssh_key) = match repo.auth_type {
            GitAuthType::None => (None, None),
            GitAuthType::Http => (decrypt(&repo.encrypted_token)?, None),
            GitAuthType::Ssh => (None, decrypt(&repo.encrypted_ssh_key)?),
        };

        Ok(RepositoryCredential {
            id: repo.id.clone(),
            name: repo.name.clone(),
            url: repo.url.clone(),
            auth_type: repo.auth_type,
            username: repo.username.clone(),
            token,
            ssh_key,
            host_key_policy: repo.host_key_policy,
            enabled: repo.enabled,
        })
    }

    /// Pushes all enabled credentials to one environment in one request.
    pub async fn sync_to_environment(&self, env_id: &str) -> Result<PropagationReport> {
        if is_local_id(env_id) {
            return Err(CredentialError::LocalEnvironment);
        }

        let env = self
            .environments
            .get_by_id(env_id)?
            .ok_or_else(|| CredentialError::EnvironmentNotFound(env_id.to_string()))?;
        if !env.enabled {
            return Err(CredentialError::EnvironmentDisabled(env.id));
        }

        let prepared = self.prepare_payload()?;
        let mut request = DispatchRequest::post_json(
            &env.api_url,
            CREDENTIAL_SYNC_PATH,
            &prepared.payload,
            self.timeout,
        )?;
        if let Some(token) = &env.access_token {
            request = request.header(AGENT_TOKEN_HEADER, token);
        }

        let response = self.dispatcher.dispatch_to(&env, request).await?;
        if !response.is_success() {
            return Err(CredentialError::RemoteStatus {
                status: response.status,
                body: response.error_text(),
            });
        }

        let reply: CredentialSyncResponse = response.json()?;
        if !reply.success {
            return Err(CredentialError::Rejected(reply.message));
        }

        let report = PropagationReport {
            environment_id: env.id.clone(),
            registries_sent: prepared.payload.registries.len(),
            repositories_sent: prepared.payload.repositories.len(),
            skipped: prepared.skipped,
            message: reply.message,
        };

        log::info!(
            "Pushed {} registry and {} repository credential(s) to {} ({} skipped)",
            report.registries_sent,
            report.repositories_sent,
            env.name,
            report.skipped.len()
        );
        self.audit.record(
            AuditEvent::new(
                event_types::CREDENTIALS_PROPAGATED,
                if report.skipped.is_empty() {
                    Severity::Success
                } else {
                    Severity::Warning
                },
                format!("Credentials pushed to {}", env.name),
            )
            .description(format!(
                "{} registries, {} repositories, {} skipped",
                report.registries_sent,
                report.repositories_sent,
                report.skipped.len()
            ))
            .resource(ResourceRef::new("environment", &env.id, Some(&env.name))),
        );

        Ok(report)
    }

    /// Pushes to every enabled remote environment. One failing environment
    /// does not stop the others.
    pub async fn sync_to_all_remote(&self) -> Result<Vec<(String, Result<PropagationReport>)>> {
        let mut results = Vec::new();
        for env in self.environments.list_remote()? {
            let result = self.sync_to_environment(&env.id).await;
            if let Err(e) = &result {
                log::warn!("Credential sync to {} ({}) failed: {}", env.name, env.id, e);
            }
            results.push((env.id, result));
        }
        Ok(results)
    }
}
