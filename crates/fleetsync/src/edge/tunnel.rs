//! Outbound tunnels opened by edge agents.
//!
//! An edge agent cannot be dialled; it keeps a connection open to the
//! manager instead. Whatever carries that connection (websocket, gRPC
//! stream) registers it with the [`TunnelHub`] and answers the
//! [`TunnelEnvelope`]s it receives.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::error::{Result, TransportError};

/// Number of requests that may wait on a single tunnel.
const TUNNEL_BUFFER: usize = 32;

/// A request addressed by path; edge agents have no reachable base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Registry of live tunnels keyed by environment ID.
#[async_trait]
pub trait TunnelRegistry: Send + Sync {
    fn has_active_tunnel(&self, env_id: &str) -> bool;

    /// Sends a request over the environment's tunnel and waits for the
    /// agent's reply. Deadlines are applied by the caller.
    async fn send(&self, env_id: &str, request: TunnelRequest) -> Result<TunnelResponse>;
}

/// A request delivered to the agent side, with its reply channel.
#[derive(Debug)]
pub struct TunnelEnvelope {
    pub request: TunnelRequest,
    reply: oneshot::Sender<std::result::Result<TunnelResponse, String>>,
}

impl TunnelEnvelope {
    /// Answers the request. Returns false if the caller stopped waiting.
    pub fn respond(self, response: std::result::Result<TunnelResponse, String>) -> bool {
        self.reply.send(response).is_ok()
    }
}

/// Agent side of a registered tunnel. Dropping it closes the tunnel.
#[derive(Debug)]
pub struct TunnelHandle {
    env_id: String,
    receiver: mpsc::Receiver<TunnelEnvelope>,
}

impl TunnelHandle {
    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    /// Next request for the agent, or `None` once the hub dropped the tunnel.
    pub async fn next(&mut self) -> Option<TunnelEnvelope> {
        self.receiver.recv().await
    }
}

/// In-process [`TunnelRegistry`].
#[derive(Default)]
pub struct TunnelHub {
    tunnels: Mutex<HashMap<String, mpsc::Sender<TunnelEnvelope>>>,
}

impl TunnelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tunnel for `env_id`, replacing any previous one.
    pub fn register(&self, env_id: &str) -> TunnelHandle {
        let (sender, receiver) = mpsc::channel(TUNNEL_BUFFER);
        if let Ok(mut tunnels) = self.tunnels.lock() {
            if tunnels.insert(env_id.to_string(), sender).is_some() {
                log::info!("Replaced tunnel for environment {}", env_id);
            } else {
                log::info!("Tunnel registered for environment {}", env_id);
            }
        }
        TunnelHandle {
            env_id: env_id.to_string(),
            receiver,
        }
    }

    /// Drops the tunnel for `env_id`. Returns whether one was registered.
    pub fn unregister(&self, env_id: &str) -> bool {
        let removed = self
            .tunnels
            .lock()
            .map(|mut tunnels| tunnels.remove(env_id).is_some())
            .unwrap_or(false);
        if removed {
            log::info!("Tunnel unregistered for environment {}", env_id);
        }
        removed
    }

    /// Live sender for `env_id`. Senders whose handle was dropped are pruned.
    fn sender_for(&self, env_id: &str) -> Option<mpsc::Sender<TunnelEnvelope>> {
        let mut tunnels = self.tunnels.lock().ok()?;
        match tunnels.get(env_id) {
            Some(sender) if !sender.is_closed() => Some(sender.clone()),
            Some(_) => {
                tunnels.remove(env_id);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl TunnelRegistry for TunnelHub {
    fn has_active_tunnel(&self, env_id: &str) -> bool {
        self.sender_for(env_id).is_some()
    }

    async fn send(&self, env_id: &str, request: TunnelRequest) -> Result<TunnelResponse> {
        let not_connected = || TransportError::NotConnected {
            env_id: env_id.to_string(),
        };

        let sender = self.sender_for(env_id).ok_or_else(not_connected)?;
        let (reply, reply_rx) = oneshot::channel();
        sender
            .send(TunnelEnvelope { request, reply })
            .await
            .map_err(|_| not_connected())?;

        match reply_rx.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(reason)) => Err(TransportError::Tunnel {
                env_id: env_id.to_string(),
                reason,
            }),
            Err(_) => Err(TransportError::Tunnel {
                env_id: env_id.to_string(),
                reason: "tunnel closed before replying".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health_request() -> TunnelRequest {
        TunnelRequest {
            method: "GET".to_string(),
            path: "/health".to_string(),
            headers: vec![],
            body: None,
        }
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let hub = TunnelHub::new();
        let mut handle = hub.register("edge-1");
        assert!(hub.has_active_tunnel("edge-1"));

        let agent = tokio::spawn(async move {
            let envelope = handle.next().await.unwrap();
            assert_eq!(envelope.request.path, "/health");
            envelope.respond(Ok(TunnelResponse {
                status: 200,
                body: b"ok".to_vec(),
            }));
        });

        let response = hub.send("edge-1", health_request()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ok");
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_tunnel_is_not_connected() {
        let hub = TunnelHub::new();
        assert!(!hub.has_active_tunnel("edge-1"));
        let err = hub.send("edge-1", health_request()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_dropped_handle_closes_tunnel() {
        let hub = TunnelHub::new();
        let handle = hub.register("edge-1");
        drop(handle);
        assert!(!hub.has_active_tunnel("edge-1"));
        assert!(matches!(
            hub.send("edge-1", health_request()).await,
            Err(TransportError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_agent_error_reply() {
        let hub = TunnelHub::new();
        let mut handle = hub.register("edge-1");
        tokio::spawn(async move {
            if let Some(envelope) = handle.next().await {
                envelope.respond(Err("docker unavailable".to_string()));
            }
        });
        let err = hub.send("edge-1", health_request()).await.unwrap_err();
        assert!(err.to_string().contains("docker unavailable"));
    }

    #[test]
    fn test_unregister() {
        let hub = TunnelHub::new();
        let _handle = hub.register("edge-1");
        assert!(hub.unregister("edge-1"));
        assert!(!hub.unregister("edge-1"));
        assert!(!hub.has_active_tunnel("edge-1"));
    }
}
