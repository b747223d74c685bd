//! Container registry credential CRUD.

use std::sync::Arc;

use chrono::Utc;

use super::error::{CredentialError, Result};
use super::model::{ContainerRegistry, CreateRegistry, RegistryPatch};
use super::store::RegistryStore;
use crate::secrets::Encryptor;

pub struct RegistryService {
    store: Arc<dyn RegistryStore>,
    encryptor: Arc<dyn Encryptor>,
}

impl RegistryService {
    pub fn new(store: Arc<dyn RegistryStore>, encryptor: Arc<dyn Encryptor>) -> Self {
        Self { store, encryptor }
    }

    pub fn create(&self, input: CreateRegistry) -> Result<ContainerRegistry> {
        let url = input.url.trim();
        if url.is_empty() {
            return Err(CredentialError::Validation(
                "registry URL must not be empty".to_string(),
            ));
        }
        if input.username.trim().is_empty() || input.token.is_empty() {
            return Err(CredentialError::Validation(
                "registry username and token are required".to_string(),
            ));
        }

        let now = Utc::now();
        let registry = ContainerRegistry {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            username: input.username.trim().to_string(),
            encrypted_token: self.encryptor.encrypt(&input.token)?,
            description: input.description,
            insecure: input.insecure,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        };
        self.store.create_registry(&registry)?;
        log::info!("Added registry credential for {}", registry.url);
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<ContainerRegistry> {
        self.store
            .get_registry(id)?
            .ok_or_else(|| CredentialError::RegistryNotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<ContainerRegistry>> {
        Ok(self.store.list_registries()?)
    }

    /// Applies a partial update. The token is re-encrypted only when a new
    /// one is supplied.
    pub fn update(&self, id: &str, patch: RegistryPatch) -> Result<ContainerRegistry> {
        let mut registry = self.get(id)?;

        if let Some(url) = patch.url {
            if url.trim().is_empty() {
                return Err(CredentialError::Validation(
                    "registry URL must not be empty".to_string(),
                ));
            }
            registry.url = url.trim().to_string();
        }
        if let Some(username) = patch.username {
            registry.username = username.trim().to_string();
        }
        if let Some(token) = patch.token {
            if token.is_empty() {
                return Err(CredentialError::Validation(
                    "registry token must not be empty".to_string(),
                ));
            }
            registry.encrypted_token = self.encryptor.encrypt(&token)?;
        }
        patch.description.apply(&mut registry.description);
        if let Some(insecure) = patch.insecure {
            registry.insecure = insecure;
        }
        if let Some(enabled) = patch.enabled {
            registry.enabled = enabled;
        }
        registry.updated_at = Utc::now();

        if !self.store.update_registry(&registry)? {
            return Err(CredentialError::RegistryNotFound(id.to_string()));
        }
        Ok(registry)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.store.delete_registry(id)? {
            return Err(CredentialError::RegistryNotFound(id.to_string()));
        }
        Ok(())
    }
}
