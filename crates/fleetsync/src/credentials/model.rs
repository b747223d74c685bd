//! Container registry credentials and the batched sync payload pushed to
//! remote environments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::environment::model::FieldUpdate;
use crate::gitops::model::{GitAuthType, HostKeyPolicy};

/// A container registry login stored by this manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRegistry {
    pub id: String,
    pub url: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub encrypted_token: String,
    pub description: Option<String>,
    pub insecure: bool,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a registry credential. `token` is plaintext.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistry {
    pub url: String,
    pub username: String,
    pub token: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial update for a registry credential.
#[derive(Debug, Clone, Default)]
pub struct RegistryPatch {
    pub url: Option<String>,
    pub username: Option<String>,
    /// Plaintext; re-encrypted when set.
    pub token: Option<String>,
    pub description: FieldUpdate<String>,
    pub insecure: Option<bool>,
    pub enabled: Option<bool>,
}

/// Decrypted registry credential as sent to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredential {
    pub id: String,
    pub url: String,
    pub username: String,
    pub token: String,
    pub insecure: bool,
    pub enabled: bool,
}

/// Decrypted repository credential as sent to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCredential {
    pub id: String,
    pub name: String,
    pub url: String,
    pub auth_type: GitAuthType,
    pub username: Option<String>,
    pub token: Option<String>,
    pub ssh_key: Option<String>,
    pub host_key_policy: HostKeyPolicy,
    pub enabled: bool,
}

/// Body of `POST /api/credentials/sync` on an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSyncPayload {
    pub registries: Vec<RegistryCredential>,
    pub repositories: Vec<RepositoryCredential>,
}

/// Agent reply to a credential sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSyncResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Summary of one propagation to one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub environment_id: String,
    pub registries_sent: usize,
    pub repositories_sent: usize,
    /// IDs of credentials that could not be decrypted and were left out.
    pub skipped: Vec<String>,
    pub message: String,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_format() {
        let payload = CredentialSyncPayload {
            registries: vec![RegistryCredential {
                id: "reg-1".to_string(),
                url: "ghcr.io".to_string(),
                username: "bot".to_string(),
                token: "t".to_string(),
                insecure: false,
                enabled: true,
            }],
            repositories: vec![],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["registries"][0]["url"], "ghcr.io");
        assert!(value["repositories"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_response_message_optional() {
        let response: CredentialSyncResponse =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(response.success);
        assert!(response.message.is_empty());
    }
}
