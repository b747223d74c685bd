//! Persistence contract for container registry credentials.

use super::model::ContainerRegistry;
use crate::db::DatabaseError;

pub trait RegistryStore: Send + Sync {
    fn create_registry(&self, registry: &ContainerRegistry) -> Result<(), DatabaseError>;

    fn get_registry(&self, id: &str) -> Result<Option<ContainerRegistry>, DatabaseError>;

    fn list_registries(&self) -> Result<Vec<ContainerRegistry>, DatabaseError>;

    /// Overwrites every mutable column.
    fn update_registry(&self, registry: &ContainerRegistry) -> Result<bool, DatabaseError>;

    fn delete_registry(&self, id: &str) -> Result<bool, DatabaseError>;
}
