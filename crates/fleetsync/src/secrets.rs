//! Credential encryption and secret resolution.
//!
//! Registry tokens, Git tokens and SSH keys are stored encrypted at rest with
//! AES-256-GCM. The 32-byte key itself is resolved from one of three sources
//! in priority order:
//!
//! 1. **Direct value** in the config file (local testing only)
//! 2. **File reference** (Docker secrets, e.g. `/run/secrets/fleetsync_key`)
//! 3. **Environment variable** (default `FLEETSYNC_ENCRYPTION_KEY`)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretString};
use std::fs;

/// Error type for secret resolution and credential encryption.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),
}

/// Result type for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;

/// Opaque encrypt/decrypt capability used wherever credentials are stored
/// or pushed to remote environments.
pub trait Encryptor: Send + Sync {
    /// Encrypts plaintext into an opaque, storable string.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Reverses [`Encryptor::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Resolves a secret from a direct value, a file, or an environment
/// variable, in that order. Empty values are treated as absent.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct {
        if !value.is_empty() {
            return Ok(SecretString::from(value.to_string()));
        }
    }

    if let Some(path) = file_path {
        if !path.is_empty() {
            let expanded = expand_home(path);
            return match fs::read_to_string(&expanded) {
                Ok(content) => Ok(SecretString::from(content.trim().to_string())),
                Err(e) => Err(SecretError::FileReadError {
                    path: expanded,
                    source: e,
                }),
            };
        }
    }

    if let Some(var_name) = env_var {
        if !var_name.is_empty() {
            return match std::env::var(var_name) {
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: var_name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: var_name.to_string(),
                }),
            };
        }
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            if path == "~" {
                return home.to_string_lossy().into_owned();
            }
            return home.join(&path[2..]).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Default environment variable holding the hex-encoded encryption key.
pub const ENCRYPTION_KEY_ENV_VAR: &str = "FLEETSYNC_ENCRYPTION_KEY";

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM credential encryptor.
///
/// Ciphertext format: hex(`<12-byte nonce><ciphertext+tag>`).
pub struct TokenEncryptor {
    cipher: Aes256Gcm,
}

impl TokenEncryptor {
    /// Creates an encryptor from a resolved secret holding a 64-char hex key.
    pub fn from_secret(key: &SecretString) -> Result<Self> {
        Self::from_hex_key(key.expose_secret())
    }

    /// Creates an encryptor from a 64-character hex string (32 bytes).
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex.trim())
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != 32 {
            return Err(SecretError::InvalidKey(format!(
                "Key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(format!("Failed to create cipher: {}", e)))?;

        Ok(Self { cipher })
    }
}

impl Encryptor for TokenEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(hex_encode(&combined))
    }

    fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let combined = hex_decode(ciphertext_hex)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid hex: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))?;

        String::from_utf8(plaintext_bytes)
            .map_err(|e| SecretError::DecryptionError(format!("Invalid UTF-8: {}", e)))
    }
}

/// Generates a random 256-bit token, hex-encoded. Used for environment
/// access tokens handed out during pairing and key regeneration.
pub fn generate_token() -> Result<String> {
    let bytes = rand_bytes::<32>()?;
    Ok(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .ok_or_else(|| format!("Invalid hex at position {}", i))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
                })
        })
        .collect()
}

fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes).map_err(|e| {
        SecretError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("FLEETSYNC_TEST_KEY_1", "env_value");
        let result =
            resolve_secret(Some("direct_value"), None, Some("FLEETSYNC_TEST_KEY_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct_value");
        std::env::remove_var("FLEETSYNC_TEST_KEY_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  file_value  ").unwrap();

        std::env::set_var("FLEETSYNC_TEST_KEY_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("FLEETSYNC_TEST_KEY_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("FLEETSYNC_TEST_KEY_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback_and_empty_strings_ignored() {
        std::env::set_var("FLEETSYNC_TEST_KEY_3", "env_value\n");
        let result = resolve_secret(Some(""), Some(""), Some("FLEETSYNC_TEST_KEY_3")).unwrap();
        assert_eq!(result.expose_secret(), "env_value");
        std::env::remove_var("FLEETSYNC_TEST_KEY_3");
    }

    #[test]
    fn test_missing_sources() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/fleetsync/key"), None),
            Err(SecretError::FileReadError { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("FLEETSYNC_DEFINITELY_UNSET_42")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let encryptor = TokenEncryptor::from_hex_key(TEST_KEY).unwrap();
        let ciphertext = encryptor.encrypt("ghp_registry_token").unwrap();
        assert_ne!(ciphertext, "ghp_registry_token");
        assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), "ghp_registry_token");
    }

    #[test]
    fn test_nonce_makes_ciphertext_unique() {
        let encryptor = TokenEncryptor::from_hex_key(TEST_KEY).unwrap();
        let first = encryptor.encrypt("same").unwrap();
        let second = encryptor.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(matches!(
            TokenEncryptor::from_hex_key("0123456789abcdef"),
            Err(SecretError::InvalidKey(_))
        ));
        assert!(matches!(
            TokenEncryptor::from_hex_key("zz23456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"),
            Err(SecretError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_decrypt_with_other_key_fails() {
        let encryptor = TokenEncryptor::from_hex_key(TEST_KEY).unwrap();
        let other = TokenEncryptor::from_hex_key(
            "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210",
        )
        .unwrap();
        let ciphertext = encryptor.encrypt("rotated").unwrap();
        assert!(matches!(
            other.decrypt(&ciphertext),
            Err(SecretError::DecryptionError(_))
        ));
        assert!(matches!(
            encryptor.decrypt("aabb"),
            Err(SecretError::DecryptionError(_))
        ));
    }

    #[test]
    fn test_generate_token() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
