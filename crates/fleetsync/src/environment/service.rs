//! Environment lifecycle: registration, edits, key rotation, pairing and
//! request proxying.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;

use super::error::{EnvironmentError, Result};
use super::health::{HealthProber, ProbeOutcome, AGENT_TOKEN_HEADER};
use super::model::{
    is_local_id, CreateEnvironment, Environment, EnvironmentPatch, EnvironmentStatus,
    FieldUpdate, LOCAL_ENVIRONMENT_ID,
};
use super::store::EnvironmentStore;
use crate::audit::{event_types, AuditEvent, AuditSink, ResourceRef, Severity};
use crate::edge::{DispatchRequest, DispatchResponse, EdgeDispatcher};
use crate::gitops::store::GitOpsStore;
use crate::sanitize::redact_url;
use crate::secrets::generate_token;

/// Agent endpoint exchanging a bootstrap token for a long-lived one.
pub const PAIR_PATH: &str = "/api/agent/pair";

/// Header carrying the one-time bootstrap token during pairing.
pub const BOOTSTRAP_HEADER: &str = "X-Agent-Bootstrap";

const LOCAL_ENVIRONMENT_NAME: &str = "local";

#[derive(Debug, Deserialize)]
struct PairResponse {
    token: String,
}

pub struct EnvironmentService {
    store: Arc<dyn EnvironmentStore>,
    syncs: Arc<dyn GitOpsStore>,
    dispatcher: Arc<EdgeDispatcher>,
    prober: Arc<HealthProber>,
    audit: Arc<dyn AuditSink>,
    proxy_timeout: Duration,
}

impl EnvironmentService {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        syncs: Arc<dyn GitOpsStore>,
        dispatcher: Arc<EdgeDispatcher>,
        prober: Arc<HealthProber>,
        audit: Arc<dyn AuditSink>,
        proxy_timeout: Duration,
    ) -> Self {
        Self {
            store,
            syncs,
            dispatcher,
            prober,
            audit,
            proxy_timeout,
        }
    }

    /// Registers a remote environment. With `issue_api_key` it starts
    /// `pending` and carries a freshly generated access token.
    pub fn create(&self, input: CreateEnvironment) -> Result<Environment> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(EnvironmentError::Validation(
                "environment name must not be empty".to_string(),
            ));
        }
        let api_url = input.api_url.trim().to_string();
        if !input.is_edge {
            validate_api_url(&api_url)?;
        }

        let (status, access_token, api_key_id) = if input.issue_api_key {
            (
                EnvironmentStatus::Pending,
                Some(generate_token()?),
                Some(uuid::Uuid::new_v4().to_string()),
            )
        } else {
            (EnvironmentStatus::Offline, input.access_token, None)
        };

        let now = Utc::now();
        let env = Environment {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            api_url,
            is_edge: input.is_edge,
            status,
            enabled: true,
            last_seen: None,
            access_token,
            api_key_id,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&env)?;

        log::info!(
            "Registered environment {} ({}) at {} [{}]",
            env.name,
            env.id,
            if env.is_edge {
                "edge tunnel".to_string()
            } else {
                redact_url(&env.api_url)
            },
            env.status
        );
        Ok(env)
    }

    /// Creates environment `"0"` if it does not exist yet.
    pub fn ensure_local_environment(&self) -> Result<Environment> {
        if let Some(env) = self.store.get_by_id(LOCAL_ENVIRONMENT_ID)? {
            return Ok(env);
        }

        let now = Utc::now();
        let env = Environment {
            id: LOCAL_ENVIRONMENT_ID.to_string(),
            name: LOCAL_ENVIRONMENT_NAME.to_string(),
            api_url: String::new(),
            is_edge: false,
            status: EnvironmentStatus::Offline,
            enabled: true,
            last_seen: None,
            access_token: None,
            api_key_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&env)?;
        log::info!("Created local environment");
        Ok(env)
    }

    pub fn get(&self, id: &str) -> Result<Environment> {
        self.store
            .get_by_id(id)?
            .ok_or_else(|| EnvironmentError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Environment>> {
        Ok(self.store.list()?)
    }

    pub fn update(&self, id: &str, patch: EnvironmentPatch) -> Result<Environment> {
        let current = self.get(id)?;
        if patch.is_empty() {
            return Ok(current);
        }

        // Liveness is owned by probes, heartbeats, key rotation and pairing.
        if patch.status.is_some() || !patch.last_seen.is_keep() {
            return Err(EnvironmentError::Validation(
                "status and last seen cannot be edited directly".to_string(),
            ));
        }
        if current.is_local() && (patch.api_url.is_some() || patch.is_edge.is_some()) {
            return Err(EnvironmentError::LocalEnvironment {
                operation: "change the address of",
            });
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(EnvironmentError::Validation(
                    "environment name must not be empty".to_string(),
                ));
            }
        }

        let is_edge = patch.is_edge.unwrap_or(current.is_edge);
        let api_url = patch.api_url.as_deref().unwrap_or(&current.api_url);
        if !current.is_local() && !is_edge {
            validate_api_url(api_url.trim())?;
        }

        self.store
            .patch(id, &patch, Utc::now())?
            .ok_or_else(|| EnvironmentError::NotFound(id.to_string()))
    }

    /// Deletes an environment that no sync references.
    pub fn delete(&self, id: &str) -> Result<()> {
        if is_local_id(id) {
            return Err(EnvironmentError::LocalEnvironment { operation: "delete" });
        }

        let count = self.syncs.count_syncs_for_environment(id)?;
        if count > 0 {
            return Err(EnvironmentError::InUse {
                id: id.to_string(),
                count,
            });
        }

        if !self.store.delete(id)? {
            return Err(EnvironmentError::NotFound(id.to_string()));
        }
        log::info!("Deleted environment {}", id);
        Ok(())
    }

    /// Issues a new access token. The environment goes back to `pending`
    /// with `last_seen` cleared until the agent pairs again. The token is
    /// returned once and otherwise only stored.
    pub fn regenerate_api_key(&self, id: &str) -> Result<String> {
        if is_local_id(id) {
            return Err(EnvironmentError::LocalEnvironment {
                operation: "regenerate the API key of",
            });
        }

        let token = generate_token()?;
        let patch = EnvironmentPatch {
            status: Some(EnvironmentStatus::Pending),
            last_seen: FieldUpdate::Clear,
            access_token: FieldUpdate::Set(token.clone()),
            api_key_id: FieldUpdate::Set(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        };
        let env = self
            .store
            .patch(id, &patch, Utc::now())?
            .ok_or_else(|| EnvironmentError::NotFound(id.to_string()))?;

        self.audit.record(
            AuditEvent::new(
                event_types::ENVIRONMENT_KEY_REGENERATED,
                Severity::Warning,
                format!("API key regenerated for {}", env.name),
            )
            .description("environment is pending until the agent pairs again")
            .resource(ResourceRef::new("environment", &env.id, Some(&env.name))),
        );
        Ok(token)
    }

    /// Exchanges a bootstrap token with the agent for a long-lived access
    /// token and stores it. A pending environment moves to `offline`; the
    /// next probe decides whether it is online.
    pub async fn pair(&self, id: &str, bootstrap_token: &str) -> Result<Environment> {
        if is_local_id(id) {
            return Err(EnvironmentError::LocalEnvironment { operation: "pair" });
        }
        let env = self.get(id)?;

        let request =
            DispatchRequest::new(Method::POST, &env.api_url, PAIR_PATH, self.proxy_timeout)
                .header(BOOTSTRAP_HEADER, bootstrap_token);
        let response = self.dispatcher.dispatch_to(&env, request).await?;
        if !response.is_success() {
            return Err(EnvironmentError::RemoteStatus {
                status: response.status,
                body: response.error_text(),
            });
        }

        let paired: PairResponse = response
            .json()
            .map_err(|e| EnvironmentError::Pairing(e.to_string()))?;
        if paired.token.trim().is_empty() {
            return Err(EnvironmentError::Pairing(
                "agent returned an empty token".to_string(),
            ));
        }

        let patch = EnvironmentPatch {
            access_token: FieldUpdate::Set(paired.token),
            status: (env.status == EnvironmentStatus::Pending).then_some(EnvironmentStatus::Offline),
            ..Default::default()
        };
        let updated = self
            .store
            .patch(id, &patch, Utc::now())?
            .ok_or_else(|| EnvironmentError::NotFound(id.to_string()))?;

        log::info!("Paired environment {} ({})", updated.name, updated.id);
        self.audit.record(
            AuditEvent::new(
                event_types::ENVIRONMENT_PAIRED,
                Severity::Success,
                format!("Environment {} paired", updated.name),
            )
            .resource(ResourceRef::new("environment", &updated.id, Some(&updated.name))),
        );
        Ok(updated)
    }

    /// Forwards a request to a remote environment's agent.
    pub async fn proxy(
        &self,
        id: &str,
        method: Method,
        path: &str,
        headers: Vec<(String, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<DispatchResponse> {
        if is_local_id(id) {
            return Err(EnvironmentError::LocalEnvironment { operation: "proxy to" });
        }
        let env = self.get(id)?;
        if !env.enabled {
            return Err(EnvironmentError::Disabled { id: env.id });
        }

        let mut request = DispatchRequest::new(method, &env.api_url, path, self.proxy_timeout);
        request.headers = headers;
        request.body = body;
        if let Some(token) = &env.access_token {
            request = request.header(AGENT_TOKEN_HEADER, token);
        }

        Ok(self.dispatcher.dispatch_to(&env, request).await?)
    }

    /// Probes the environment. With an override URL nothing is written.
    pub async fn test_connection(
        &self,
        id: &str,
        override_url: Option<&str>,
    ) -> Result<ProbeOutcome> {
        self.prober.test_connection(id, override_url).await
    }
}

/// Accepts absolute `http`/`https` URLs with a host.
pub fn validate_api_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|e| EnvironmentError::InvalidUrl {
        url: redact_url(url),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EnvironmentError::InvalidUrl {
            url: redact_url(url),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    if parsed.host_str().is_none() {
        return Err(EnvironmentError::InvalidUrl {
            url: redact_url(url),
            reason: "missing host".to_string(),
        });
    }
    Ok(())
}
