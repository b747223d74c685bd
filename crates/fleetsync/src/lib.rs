pub mod audit;
pub mod config;
pub mod credentials;
pub mod db;
pub mod docker;
pub mod edge;
pub mod environment;
pub mod error;
pub mod gitops;
pub mod logging;
pub mod projects;
pub mod sanitize;
pub mod secrets;
pub mod worker;

pub use audit::{AuditEvent, AuditSink, Severity};
pub use config::{load_config, FleetConfig};
pub use credentials::{CredentialError, CredentialPropagator, RegistryService};
pub use db::{Database, DatabaseError};
pub use edge::{EdgeDispatcher, TransportError, TunnelHub, TunnelRegistry};
pub use environment::{
    Environment, EnvironmentError, EnvironmentService, EnvironmentStatus, HealthProber,
    HeartbeatReconciler,
};
pub use error::{ConfigError, FleetError, Result};
pub use gitops::{
    GitOpsError, GitOpsReconciler, RepositoryService, SyncScheduler, SyncService,
};
pub use projects::{ComposeProvisioner, ProjectError, ProjectProvisioner};
pub use secrets::{resolve_secret, Encryptor, SecretError, TokenEncryptor};
