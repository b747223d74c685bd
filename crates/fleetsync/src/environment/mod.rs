//! Environments: the managed Docker hosts, their liveness state machine
//! and the services that act on them.

pub mod error;
pub mod health;
pub mod heartbeat;
pub mod model;
pub mod service;
pub mod store;

pub use error::{EnvironmentError, Result};
pub use health::{HealthProber, ProbeOutcome};
pub use heartbeat::HeartbeatReconciler;
pub use model::{
    CreateEnvironment, Environment, EnvironmentPatch, EnvironmentStatus, FieldUpdate, Topology,
    LOCAL_ENVIRONMENT_ID,
};
pub use service::EnvironmentService;
pub use store::EnvironmentStore;
