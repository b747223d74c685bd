//! Wires every service over an in-memory database and the fakes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use fleetsync::credentials::model::CreateRegistry;
use fleetsync::credentials::{CredentialPropagator, RegistryService, RegistryStore};
use fleetsync::db::Database;
use fleetsync::edge::EdgeDispatcher;
use fleetsync::environment::{
    CreateEnvironment, Environment, EnvironmentService, EnvironmentStore, HealthProber,
    HeartbeatReconciler,
};
use fleetsync::gitops::{
    CreateRepository, CreateSync, GitAuthType, GitOpsReconciler, GitOpsStore, GitOpsSync,
    GitRepository, ReconcilerSettings, RepositoryService, SyncService,
};
use fleetsync::secrets::TokenEncryptor;

use super::fakes::{
    FakeDockerEngine, FakeGitClient, FakeProvisioner, FakeTunnelRegistry, RecordingAuditSink,
};

pub const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub const COMPOSE_V1: &str = "services:\n  web:\n    image: nginx:1.25\n";
pub const COMPOSE_V2: &str = "services:\n  web:\n    image: nginx:1.27\n";

pub struct TestHarness {
    _temp_dir: TempDir,
    pub db: Database,
    pub audit: Arc<RecordingAuditSink>,
    pub git: Arc<FakeGitClient>,
    pub provisioner: Arc<FakeProvisioner>,
    pub tunnels: Arc<FakeTunnelRegistry>,
    pub docker: Arc<FakeDockerEngine>,
    pub encryptor: Arc<TokenEncryptor>,
    pub dispatcher: Arc<EdgeDispatcher>,
    pub prober: Arc<HealthProber>,
    pub heartbeats: HeartbeatReconciler,
    pub environments: EnvironmentService,
    pub registries: RegistryService,
    pub repositories: RepositoryService,
    pub reconciler: Arc<GitOpsReconciler>,
    pub syncs: SyncService,
    pub propagator: CredentialPropagator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(ReconcilerSettings {
            git_timeout: Duration::from_secs(10),
            drift_buffer: Duration::from_secs(30),
            max_concurrent: 2,
        })
    }

    pub fn with_settings(settings: ReconcilerSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");

        let env_store: Arc<dyn EnvironmentStore> = Arc::new(db.clone());
        let gitops_store: Arc<dyn GitOpsStore> = Arc::new(db.clone());
        let registry_store: Arc<dyn RegistryStore> = Arc::new(db.clone());

        let audit = Arc::new(RecordingAuditSink::default());
        let git = Arc::new(FakeGitClient::new(&temp_dir.path().join("workspaces")));
        let provisioner = Arc::new(FakeProvisioner::default());
        let tunnels = Arc::new(FakeTunnelRegistry::default());
        let docker = Arc::new(FakeDockerEngine::default());
        let encryptor = Arc::new(TokenEncryptor::from_hex_key(TEST_KEY).expect("valid key"));
        let dispatcher =
            Arc::new(EdgeDispatcher::new(tunnels.clone()).expect("Failed to build dispatcher"));

        let prober = Arc::new(HealthProber::new(
            env_store.clone(),
            dispatcher.clone(),
            docker.clone(),
            audit.clone(),
            Duration::from_secs(2),
        ));
        let heartbeats = HeartbeatReconciler::new(env_store.clone(), Duration::from_secs(30));
        let environments = EnvironmentService::new(
            env_store.clone(),
            gitops_store.clone(),
            dispatcher.clone(),
            prober.clone(),
            audit.clone(),
            Duration::from_secs(2),
        );
        environments
            .ensure_local_environment()
            .expect("Failed to create local environment");

        let registries = RegistryService::new(registry_store.clone(), encryptor.clone());
        let repositories =
            RepositoryService::new(gitops_store.clone(), encryptor.clone(), git.clone());
        let reconciler = Arc::new(GitOpsReconciler::new(
            gitops_store.clone(),
            env_store.clone(),
            git.clone(),
            provisioner.clone(),
            encryptor.clone(),
            audit.clone(),
            settings,
        ));
        let syncs = SyncService::new(
            gitops_store.clone(),
            env_store.clone(),
            provisioner.clone(),
            reconciler.clone(),
            git.clone(),
            encryptor.clone(),
        );
        let propagator = CredentialPropagator::new(
            env_store,
            registry_store,
            gitops_store,
            encryptor.clone(),
            dispatcher.clone(),
            audit.clone(),
            Duration::from_secs(2),
        );

        Self {
            _temp_dir: temp_dir,
            db,
            audit,
            git,
            provisioner,
            tunnels,
            docker,
            encryptor,
            dispatcher,
            prober,
            heartbeats,
            environments,
            registries,
            repositories,
            reconciler,
            syncs,
            propagator,
        }
    }

    pub fn remote_env(&self, name: &str, api_url: &str) -> Environment {
        self.environments
            .create(CreateEnvironment {
                name: name.to_string(),
                api_url: api_url.to_string(),
                access_token: Some(format!("{}-token", name)),
                ..Default::default()
            })
            .expect("Failed to create environment")
    }

    pub fn pending_env(&self, name: &str, api_url: &str) -> Environment {
        self.environments
            .create(CreateEnvironment {
                name: name.to_string(),
                api_url: api_url.to_string(),
                issue_api_key: true,
                ..Default::default()
            })
            .expect("Failed to create environment")
    }

    pub fn edge_env(&self, name: &str) -> Environment {
        self.environments
            .create(CreateEnvironment {
                name: name.to_string(),
                is_edge: true,
                access_token: Some(format!("{}-token", name)),
                ..Default::default()
            })
            .expect("Failed to create environment")
    }

    pub fn repository(&self, name: &str) -> GitRepository {
        self.repositories
            .create(CreateRepository {
                name: name.to_string(),
                url: format!("https://git.example.com/ops/{}.git", name),
                auth_type: GitAuthType::Http,
                username: Some("deploy".to_string()),
                token: Some("git-secret-token".to_string()),
                enabled: true,
                ..Default::default()
            })
            .expect("Failed to create repository")
    }

    pub fn registry(&self, url: &str) {
        self.registries
            .create(CreateRegistry {
                url: url.to_string(),
                username: "robot".to_string(),
                token: "registry-secret".to_string(),
                enabled: true,
                ..Default::default()
            })
            .expect("Failed to create registry");
    }

    pub fn sync(&self, env_id: &str, repo_id: &str, name: &str, auto_sync: bool) -> GitOpsSync {
        self.syncs
            .create(CreateSync {
                name: name.to_string(),
                environment_id: env_id.to_string(),
                repository_id: repo_id.to_string(),
                auto_sync,
                ..Default::default()
            })
            .expect("Failed to create sync")
    }

    /// A repository with `docker-compose.yml` at the root and an auto-sync
    /// definition targeting the local environment.
    pub fn local_sync(&self, name: &str) -> GitOpsSync {
        self.git.set_file("docker-compose.yml", COMPOSE_V1);
        let repo = self.repository(&format!("{}-repo", name));
        self.sync("0", &repo.id, name, true)
    }

    pub fn reload_sync(&self, id: &str) -> GitOpsSync {
        self.syncs.get(id).expect("sync exists")
    }
}
