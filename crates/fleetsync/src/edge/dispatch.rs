//! Topology-aware request dispatch.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{Result, TransportError};
use super::tunnel::{TunnelRegistry, TunnelRequest};
use crate::environment::model::{is_local_id, join_url, Environment};
use crate::sanitize::{redact_url, truncate_body};

/// Connect timeout for direct HTTP calls. Request deadlines are per call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a response body quoted in an error message.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

/// A request to an environment. `target_url` is only used for direct
/// environments; edge environments are addressed by `path` alone.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub target_url: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl DispatchRequest {
    pub fn new(method: Method, target_url: &str, path: &str, timeout: Duration) -> Self {
        Self {
            method,
            target_url: target_url.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn get(target_url: &str, path: &str, timeout: Duration) -> Self {
        Self::new(Method::GET, target_url, path, timeout)
    }

    /// A POST with a JSON body and matching content type.
    pub fn post_json<T: Serialize>(
        target_url: &str,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(Self::new(Method::POST, target_url, path, timeout)
            .header("Content-Type", "application/json")
            .body(bytes))
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Uniform result regardless of how the environment was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DispatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body text shortened for error messages.
    pub fn error_text(&self) -> String {
        truncate_body(&self.text(), MAX_ERROR_BODY_LENGTH)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TransportError::InvalidResponse(format!("invalid JSON body: {}", e)))
    }
}

/// Resolves how to reach an environment and executes the request.
///
/// - local (`"0"`): rejected; the local host is reached through the Docker
///   engine, never over HTTP
/// - edge: sent over the agent's tunnel if one is active, otherwise fails
///   fast with [`TransportError::NotConnected`]
/// - direct: plain HTTP to `target_url` + `path`
pub struct EdgeDispatcher {
    client: Client,
    tunnels: Arc<dyn TunnelRegistry>,
}

impl EdgeDispatcher {
    pub fn new(tunnels: Arc<dyn TunnelRegistry>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Request {
                target: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, tunnels })
    }

    pub fn has_active_tunnel(&self, env_id: &str) -> bool {
        self.tunnels.has_active_tunnel(env_id)
    }

    /// Dispatches to an environment using its stored topology and URL.
    /// `request.target_url` is replaced by the environment's `api_url`.
    pub async fn dispatch_to(
        &self,
        env: &Environment,
        mut request: DispatchRequest,
    ) -> Result<DispatchResponse> {
        request.target_url = env.api_url.clone();
        self.dispatch(&env.id, env.is_edge, request).await
    }

    pub async fn dispatch(
        &self,
        env_id: &str,
        is_edge: bool,
        request: DispatchRequest,
    ) -> Result<DispatchResponse> {
        if is_local_id(env_id) {
            return Err(TransportError::LocalEnvironment);
        }

        if is_edge {
            self.dispatch_tunnel(env_id, request).await
        } else {
            self.dispatch_direct(request).await
        }
    }

    async fn dispatch_tunnel(
        &self,
        env_id: &str,
        request: DispatchRequest,
    ) -> Result<DispatchResponse> {
        if !self.tunnels.has_active_tunnel(env_id) {
            return Err(TransportError::NotConnected {
                env_id: env_id.to_string(),
            });
        }

        let target = format!("tunnel://{}{}", env_id, request.path);
        let timeout = request.timeout;
        let tunnel_request = TunnelRequest {
            method: request.method.as_str().to_string(),
            path: request.path,
            headers: request.headers,
            body: request.body,
        };

        log::debug!("Dispatching {} via tunnel", target);

        match tokio::time::timeout(timeout, self.tunnels.send(env_id, tunnel_request)).await {
            Ok(Ok(response)) => Ok(DispatchResponse {
                status: response.status,
                body: response.body,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout { target, timeout }),
        }
    }

    /// Plain HTTP to `target_url` + `path`, bypassing topology. Used to test a
    /// URL before it is saved on an environment.
    pub async fn dispatch_direct(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        if request.target_url.trim().is_empty() {
            return Err(TransportError::InvalidUrl {
                url: String::new(),
                reason: "environment has no API URL".to_string(),
            });
        }

        let url = join_url(&request.target_url, &request.path);
        let redacted = redact_url(&url);
        let parsed = reqwest::Url::parse(&url).map_err(|e| TransportError::InvalidUrl {
            url: redacted.clone(),
            reason: e.to_string(),
        })?;

        log::debug!("Dispatching {} {}", request.method, redacted);

        let mut builder = self
            .client
            .request(request.method, parsed)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e, &redacted, request.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(e, &redacted, request.timeout))?;

        Ok(DispatchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error, target: &str, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout {
            target: target.to_string(),
            timeout,
        };
    }

    let is_connect = e.is_connect();
    // reqwest error text embeds the full URL; report the redacted one instead.
    let e = e.without_url();
    let mut reason = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }

    if is_connect {
        TransportError::Unreachable {
            target: target.to_string(),
            reason,
        }
    } else {
        TransportError::Request {
            target: target.to_string(),
            reason,
        }
    }
}
