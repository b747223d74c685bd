//! Active liveness probes and the status transitions they drive.
//!
//! | observed                               | status  | last_seen |
//! |----------------------------------------|---------|-----------|
//! | 2xx / engine answers                   | online  | now       |
//! | non-2xx or unexpected reply            | error   | unchanged |
//! | timeout, unreachable, no active tunnel | offline | unchanged |
//!
//! A `pending` environment is never probed and never written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{EnvironmentError, Result};
use super::model::{Environment, EnvironmentStatus, Topology};
use super::store::EnvironmentStore;
use crate::audit::{event_types, AuditEvent, AuditSink, ResourceRef, Severity};
use crate::docker::DockerEngine;
use crate::edge::{DispatchRequest, DispatchResponse, EdgeDispatcher, TransportError};

/// Agent health endpoint, relative to the environment's API URL.
pub const HEALTH_PATH: &str = "/health";

/// Header carrying an environment's access token to its agent.
pub const AGENT_TOKEN_HEADER: &str = "X-Agent-Token";

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    pub status: EnvironmentStatus,
    pub message: String,
    /// Whether the outcome was written to the store.
    pub persisted: bool,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthProber {
    store: Arc<dyn EnvironmentStore>,
    dispatcher: Arc<EdgeDispatcher>,
    docker: Arc<dyn DockerEngine>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        dispatcher: Arc<EdgeDispatcher>,
        docker: Arc<dyn DockerEngine>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            docker,
            audit,
            timeout,
        }
    }

    /// Probes a stored environment and records the outcome.
    pub async fn probe(&self, env_id: &str) -> Result<ProbeOutcome> {
        let env = self
            .store
            .get_by_id(env_id)?
            .ok_or_else(|| EnvironmentError::NotFound(env_id.to_string()))?;

        if env.status == EnvironmentStatus::Pending {
            log::debug!("Skipping probe of pending environment {}", env.id);
            return Ok(ProbeOutcome {
                status: EnvironmentStatus::Pending,
                message: "environment is awaiting pairing".to_string(),
                persisted: false,
                checked_at: Utc::now(),
            });
        }

        let (status, message) = self.observe(&env).await;
        let now = Utc::now();
        let seen_at = (status == EnvironmentStatus::Online).then_some(now);

        // Conditional on the row not having turned pending meanwhile.
        let persisted = self.store.record_probe(&env.id, status, seen_at, now)?;

        if persisted && status != env.status {
            log::info!(
                "Environment {} ({}) {} -> {}: {}",
                env.name,
                env.id,
                env.status,
                status,
                message
            );
            self.audit.record(
                AuditEvent::new(
                    event_types::ENVIRONMENT_STATUS_CHANGED,
                    if status == EnvironmentStatus::Online {
                        Severity::Info
                    } else {
                        Severity::Warning
                    },
                    format!("Environment {} is {}", env.name, status),
                )
                .description(message.clone())
                .resource(ResourceRef::new("environment", &env.id, Some(&env.name))),
            );
        }

        Ok(ProbeOutcome {
            status,
            message,
            persisted,
            checked_at: now,
        })
    }

    /// Probes `{url}/health` directly without touching any stored state.
    pub async fn probe_url(&self, url: &str) -> ProbeOutcome {
        let request = DispatchRequest::get(url, HEALTH_PATH, self.timeout);
        let (status, message) = map_result(self.dispatcher.dispatch_direct(request).await);
        ProbeOutcome {
            status,
            message,
            persisted: false,
            checked_at: Utc::now(),
        }
    }

    /// Probes with an override URL (no writes) or the stored environment.
    pub async fn test_connection(
        &self,
        env_id: &str,
        override_url: Option<&str>,
    ) -> Result<ProbeOutcome> {
        match override_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Ok(self.probe_url(url).await),
            None => self.probe(env_id).await,
        }
    }

    async fn observe(&self, env: &Environment) -> (EnvironmentStatus, String) {
        match env.topology() {
            Topology::Local => match self.docker.ping(self.timeout).await {
                Ok(()) => (EnvironmentStatus::Online, "docker engine reachable".to_string()),
                Err(reason) => (EnvironmentStatus::Offline, reason),
            },
            Topology::Edge if !self.dispatcher.has_active_tunnel(&env.id) => (
                EnvironmentStatus::Offline,
                "edge agent not connected".to_string(),
            ),
            Topology::Edge | Topology::Direct => {
                let mut request = DispatchRequest::get(&env.api_url, HEALTH_PATH, self.timeout);
                if let Some(token) = &env.access_token {
                    request = request.header(AGENT_TOKEN_HEADER, token);
                }
                map_result(self.dispatcher.dispatch_to(env, request).await)
            }
        }
    }
}

fn map_result(
    result: std::result::Result<DispatchResponse, TransportError>,
) -> (EnvironmentStatus, String) {
    match result {
        Ok(response) if response.is_success() => (
            EnvironmentStatus::Online,
            format!("health check returned HTTP {}", response.status),
        ),
        Ok(response) => (
            EnvironmentStatus::Error,
            format!(
                "health check returned HTTP {}: {}",
                response.status,
                response.error_text()
            ),
        ),
        Err(e) if e.is_unreachable() => (EnvironmentStatus::Offline, e.to_string()),
        Err(e) => (EnvironmentStatus::Error, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_result() {
        let ok = map_result(Ok(DispatchResponse {
            status: 200,
            body: vec![],
        }));
        assert_eq!(ok.0, EnvironmentStatus::Online);

        let bad = map_result(Ok(DispatchResponse {
            status: 503,
            body: b"maintenance".to_vec(),
        }));
        assert_eq!(bad.0, EnvironmentStatus::Error);
        assert!(bad.1.contains("503"));
        assert!(bad.1.contains("maintenance"));

        let timeout = map_result(Err(TransportError::Timeout {
            target: "http://x/health".to_string(),
            timeout: Duration::from_secs(10),
        }));
        assert_eq!(timeout.0, EnvironmentStatus::Offline);

        let not_connected = map_result(Err(TransportError::NotConnected {
            env_id: "e1".to_string(),
        }));
        assert_eq!(not_connected.0, EnvironmentStatus::Offline);

        let invalid = map_result(Err(TransportError::InvalidResponse("garbage".to_string())));
        assert_eq!(invalid.0, EnvironmentStatus::Error);
    }
}
