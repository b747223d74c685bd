//! Environment liveness, pairing and transport tests.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;

use common::{closed_port_url, Responder, TestHarness};
use fleetsync::audit::event_types;
use fleetsync::edge::TransportError;
use fleetsync::environment::{
    EnvironmentError, EnvironmentPatch, EnvironmentStatus, EnvironmentStore, FieldUpdate,
};
use fleetsync::gitops::GitOpsStore;

#[tokio::test]
async fn test_probe_marks_reachable_environment_online() {
    let h = TestHarness::new();
    let agent = Responder::start(200, r#"{"status":"ok"}"#).await;
    let env = h.remote_env("web-1", &agent.base_url);

    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Online);
    assert!(outcome.persisted);

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Online);
    assert!(stored.last_seen.is_some());

    let requests = agent.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/health");
    assert_eq!(requests[0].header("x-agent-token"), Some("web-1-token"));
    assert_eq!(h.audit.count(event_types::ENVIRONMENT_STATUS_CHANGED), 1);
}

#[tokio::test]
async fn test_probe_unreachable_environment_goes_offline_and_keeps_last_seen() {
    let h = TestHarness::new();
    let env = h.remote_env("web-1", &closed_port_url().await);
    let seen = Utc::now() - ChronoDuration::minutes(10);
    EnvironmentStore::patch(
        &h.db,
        &env.id,
        &EnvironmentPatch {
            status: Some(EnvironmentStatus::Online),
            last_seen: FieldUpdate::Set(seen),
            ..Default::default()
        },
        Utc::now(),
    )
    .unwrap();

    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Offline);

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Offline);
    let last_seen = stored.last_seen.unwrap();
    assert!((last_seen - seen).num_milliseconds().abs() < 1000);
}

#[tokio::test]
async fn test_probe_http_error_status_is_error() {
    let h = TestHarness::new();
    let agent = Responder::start(503, r#"{"error":"draining"}"#).await;
    let env = h.remote_env("web-1", &agent.base_url);

    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Error);
    assert!(outcome.message.contains("503"));
}

#[tokio::test]
async fn test_probe_never_changes_pending_environment() {
    let h = TestHarness::new();
    let agent = Responder::start(200, r#"{"status":"ok"}"#).await;
    let env = h.pending_env("new-box", &agent.base_url);
    assert_eq!(env.status, EnvironmentStatus::Pending);

    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Pending);
    assert!(!outcome.persisted);
    assert_eq!(agent.hits(), 0);

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Pending);
    assert!(stored.last_seen.is_none());
}

#[tokio::test]
async fn test_local_probe_uses_docker_engine() {
    let h = TestHarness::new();

    let outcome = h.prober.probe("0").await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Online);
    assert_eq!(h.docker.pings(), 1);

    h.docker.set_healthy(false);
    let outcome = h.prober.probe("0").await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Offline);
    assert_eq!(
        h.environments.get("0").unwrap().status,
        EnvironmentStatus::Offline
    );
}

#[tokio::test]
async fn test_edge_probe_follows_tunnel() {
    let h = TestHarness::new();
    let env = h.edge_env("edge-1");

    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Offline);
    assert!(h.tunnels.sent().is_empty());

    h.tunnels.connect(&env.id);
    let outcome = h.prober.probe(&env.id).await.unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Online);

    let sent = h.tunnels.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, env.id);
    assert_eq!(sent[0].1.path, "/health");
}

#[tokio::test]
async fn test_edge_dispatch_never_dials_api_url() {
    let h = TestHarness::new();
    let agent = Responder::start(200, "{}").await;
    let env = h.edge_env("edge-1");
    h.environments
        .update(
            &env.id,
            EnvironmentPatch {
                api_url: Some(agent.base_url.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    let err = h
        .environments
        .proxy(&env.id, Method::GET, "/api/containers", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnvironmentError::Transport(TransportError::NotConnected { .. })
    ));
    assert_eq!(agent.hits(), 0);
}

#[test]
fn test_heartbeat_is_idempotent_within_window() {
    let h = TestHarness::new();
    let env = h.remote_env("web-1", "http://10.0.0.5:3552");
    let now = Utc::now();

    assert!(h.heartbeats.touch(&env.id, now).unwrap());
    assert!(!h.heartbeats.touch(&env.id, now).unwrap());
    assert!(!h
        .heartbeats
        .touch(&env.id, now + ChronoDuration::seconds(5))
        .unwrap());

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Online);

    // Past the window the next heartbeat writes again.
    assert!(h
        .heartbeats
        .touch(&env.id, now + ChronoDuration::seconds(31))
        .unwrap());
}

#[test]
fn test_heartbeat_keeps_pending_status() {
    let h = TestHarness::new();
    let env = h.pending_env("new-box", "http://10.0.0.9:3552");

    assert!(h.heartbeats.touch(&env.id, Utc::now()).unwrap());

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Pending);
    assert!(stored.last_seen.is_some());
}

#[tokio::test]
async fn test_proxy_to_local_environment_is_refused_without_network() {
    let h = TestHarness::new();

    let err = h
        .environments
        .proxy("0", Method::GET, "/api/containers", vec![], None)
        .await
        .unwrap_err();
    assert!(matches!(err, EnvironmentError::LocalEnvironment { .. }));
    assert!(h.tunnels.sent().is_empty());
}

#[tokio::test]
async fn test_proxy_forwards_with_agent_token() {
    let h = TestHarness::new();
    let agent = Responder::start(200, r#"[{"id":"c1"}]"#).await;
    let env = h.remote_env("web-1", &agent.base_url);

    let response = h
        .environments
        .proxy(
            &env.id,
            Method::POST,
            "/api/containers/c1/restart",
            vec![("X-Request-Id".to_string(), "r-42".to_string())],
            Some(b"{}".to_vec()),
        )
        .await
        .unwrap();
    assert!(response.is_success());

    let requests = agent.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/api/containers/c1/restart");
    assert_eq!(requests[0].header("x-agent-token"), Some("web-1-token"));
    assert_eq!(requests[0].header("x-request-id"), Some("r-42"));
    assert_eq!(requests[0].body, b"{}");
}

#[tokio::test]
async fn test_pairing_stores_token_and_leaves_pending() {
    let h = TestHarness::new();
    let agent = Responder::start(200, r#"{"token":"long-lived-token"}"#).await;
    let env = h.pending_env("new-box", &agent.base_url);

    let paired = h.environments.pair(&env.id, "bootstrap-123").await.unwrap();
    assert_eq!(paired.status, EnvironmentStatus::Offline);
    assert_eq!(paired.access_token.as_deref(), Some("long-lived-token"));

    let requests = agent.requests();
    assert_eq!(requests[0].path, "/api/agent/pair");
    assert_eq!(requests[0].header("x-agent-bootstrap"), Some("bootstrap-123"));
    assert_eq!(h.audit.count(event_types::ENVIRONMENT_PAIRED), 1);
}

#[test]
fn test_edit_cannot_change_liveness() {
    let h = TestHarness::new();
    let pending = h.pending_env("new-box", "http://10.0.0.9:3552");
    let result = h.environments.update(
        &pending.id,
        EnvironmentPatch {
            status: Some(EnvironmentStatus::Online),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(EnvironmentError::Validation(_))));
    assert_eq!(
        h.environments.get(&pending.id).unwrap().status,
        EnvironmentStatus::Pending
    );

    let env = h.remote_env("web-1", "http://10.0.0.5:3552");
    h.heartbeats.touch(&env.id, Utc::now()).unwrap();
    let result = h.environments.update(
        &env.id,
        EnvironmentPatch {
            status: Some(EnvironmentStatus::Pending),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(EnvironmentError::Validation(_))));
    let result = h.environments.update(
        &env.id,
        EnvironmentPatch {
            last_seen: FieldUpdate::Clear,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(EnvironmentError::Validation(_))));

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Online);
    assert!(stored.last_seen.is_some());
    assert_eq!(stored.access_token.as_deref(), Some("web-1-token"));

    // Other fields still edit normally.
    let renamed = h
        .environments
        .update(
            &env.id,
            EnvironmentPatch {
                name: Some("web-primary".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "web-primary");
    assert_eq!(renamed.status, EnvironmentStatus::Online);
}

#[test]
fn test_regenerate_api_key_returns_to_pending() {
    let h = TestHarness::new();
    let env = h.remote_env("web-1", "http://10.0.0.5:3552");
    h.heartbeats.touch(&env.id, Utc::now()).unwrap();

    let token = h.environments.regenerate_api_key(&env.id).unwrap();
    assert_eq!(token.len(), 64);

    let stored = h.environments.get(&env.id).unwrap();
    assert_eq!(stored.status, EnvironmentStatus::Pending);
    assert!(stored.last_seen.is_none());
    assert_eq!(stored.access_token.as_deref(), Some(token.as_str()));

    assert!(matches!(
        h.environments.regenerate_api_key("0"),
        Err(EnvironmentError::LocalEnvironment { .. })
    ));
}

#[test]
fn test_environment_delete_guards() {
    let h = TestHarness::new();
    assert!(matches!(
        h.environments.delete("0"),
        Err(EnvironmentError::LocalEnvironment { .. })
    ));

    let env = h.remote_env("web-1", "http://10.0.0.5:3552");
    let repo = h.repository("stacks");
    let sync = h.sync(&env.id, &repo.id, "web", false);

    match h.environments.delete(&env.id) {
        Err(EnvironmentError::InUse { count, .. }) => assert_eq!(count, 1),
        other => panic!("expected InUse, got {:?}", other),
    }

    h.db.delete_sync(&sync.id).unwrap();
    h.environments.delete(&env.id).unwrap();
    assert!(matches!(
        h.environments.get(&env.id),
        Err(EnvironmentError::NotFound(_))
    ));
}

#[test]
fn test_create_validates_api_url() {
    let h = TestHarness::new();
    let result = h.environments.create(fleetsync::environment::CreateEnvironment {
        name: "bad".to_string(),
        api_url: "not a url".to_string(),
        ..Default::default()
    });
    assert!(matches!(result, Err(EnvironmentError::InvalidUrl { .. })));

    // Edge environments need no address.
    let edge = h.edge_env("edge-1");
    assert!(edge.api_url.is_empty());
}

#[tokio::test]
async fn test_connection_with_override_url_writes_nothing() {
    let h = TestHarness::new();
    let agent = Responder::start(200, "{}").await;
    let env = h.remote_env("web-1", &closed_port_url().await);

    let outcome = h
        .environments
        .test_connection(&env.id, Some(&agent.base_url))
        .await
        .unwrap();
    assert_eq!(outcome.status, EnvironmentStatus::Online);
    assert!(!outcome.persisted);
    assert_eq!(
        h.environments.get(&env.id).unwrap().status,
        EnvironmentStatus::Offline
    );
}
