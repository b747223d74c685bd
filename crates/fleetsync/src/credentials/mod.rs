//! Registry and repository credentials, and their propagation to remote
//! environments.

pub mod error;
pub mod model;
pub mod propagator;
pub mod registry_service;
pub mod store;

pub use error::{CredentialError, Result};
pub use propagator::CredentialPropagator;
pub use registry_service::RegistryService;
pub use store::RegistryStore;
