//! Compose projects: the deployment units a GitOps sync manages.

pub mod compose;
pub mod error;
pub mod model;
pub mod provisioner;
pub mod store;

pub use compose::{validate_compose, ComposeProvisioner};
pub use error::{ProjectError, Result};
pub use model::{Project, ProjectContent, ProjectDetails, ProjectStatus, ProjectUpdate};
pub use provisioner::ProjectProvisioner;
pub use store::ProjectStore;
