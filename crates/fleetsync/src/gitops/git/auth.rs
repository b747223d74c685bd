//! Git authentication handling.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::gitops::error::{GitOpsError, Result};
use crate::gitops::model::{GitAuthType, GitRepository, HostKeyPolicy};
use crate::secrets::Encryptor;

/// Username sent with token auth when the repository has none configured.
const DEFAULT_TOKEN_USERNAME: &str = "git";

/// Escapes a value for safe use in single-quoted shell strings.
/// Replaces single quotes with '\'' (end quote, escaped quote, start quote).
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Decrypted credentials for one git invocation.
#[derive(Debug, Default)]
pub struct GitCredentials {
    pub auth_type: GitAuthType,
    pub username: Option<String>,
    pub token: Option<SecretString>,
    pub ssh_key: Option<SecretString>,
    pub host_key_policy: HostKeyPolicy,
}

impl GitCredentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Decrypts the secret matching the repository's auth type.
    pub fn from_repository(repo: &GitRepository, encryptor: &dyn Encryptor) -> Result<Self> {
        let decrypt = |value: &Option<String>, what: &str| -> Result<SecretString> {
            let encrypted = value.as_deref().ok_or_else(|| {
                GitOpsError::GitAuthFailed(format!(
                    "repository '{}' has no stored {}",
                    repo.name, what
                ))
            })?;
            Ok(SecretString::from(encryptor.decrypt(encrypted)?))
        };

        let (token, ssh_key) = match repo.auth_type {
            GitAuthType::None => (None, None),
            GitAuthType::Http => (Some(decrypt(&repo.encrypted_token, "token")?), None),
            GitAuthType::Ssh => (None, Some(decrypt(&repo.encrypted_ssh_key, "SSH key")?)),
        };

        Ok(Self {
            auth_type: repo.auth_type,
            username: repo.username.clone(),
            token,
            ssh_key,
            host_key_policy: repo.host_key_policy,
        })
    }
}

/// RAII guard for a temporary credential file.
///
/// Deletes the file when dropped so secrets are not left on disk even if
/// the git command fails or the run is cancelled.
#[derive(Debug)]
pub struct TempFileCleanup {
    path: Option<PathBuf>,
}

impl TempFileCleanup {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub(crate) fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for TempFileCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up git credential file: {}", e);
            }
        }
    }
}

/// Authentication environment for git commands.
#[derive(Debug)]
pub struct AuthEnv {
    /// Environment variables to set for the git command.
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command.
    pub _cleanup: TempFileCleanup,
}

/// Writes `contents` to a new owner-only file in `dir`.
fn write_private_file(dir: &Path, file_name: &str, contents: &str, mode: u32) -> Result<PathBuf> {
    let path = dir.join(file_name);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)?;
        std::io::Write::write_all(&mut file, contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        std::fs::write(&path, contents)?;
    }

    Ok(path)
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        GitOpsError::GitAuthFailed("Temp directory path contains non-UTF8 characters".to_string())
    })
}

/// Builds the environment for one git command.
///
/// HTTP credentials are answered by a temporary `GIT_ASKPASS` script; SSH
/// keys are written to a temporary 0600 file referenced from
/// `GIT_SSH_COMMAND` together with the host key policy. Prompts are always
/// disabled.
pub fn build_auth_env(creds: &GitCredentials, temp_dir: &Path) -> Result<AuthEnv> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
    let random_suffix = uuid::Uuid::new_v4().to_string();

    let cleanup = match creds.auth_type {
        GitAuthType::None => TempFileCleanup::empty(),
        GitAuthType::Http => {
            let token = creds.token.as_ref().ok_or_else(|| {
                GitOpsError::GitAuthFailed("HTTP auth requires a token".to_string())
            })?;
            let username = creds
                .username
                .as_deref()
                .filter(|u| !u.is_empty())
                .unwrap_or(DEFAULT_TOKEN_USERNAME);

            let script = format!(
                "#!/bin/sh\ncase \"$1\" in\n  Username*) echo '{}' ;;\n  *) echo '{}' ;;\nesac\n",
                shell_escape(username),
                shell_escape(token.expose_secret())
            );
            let path = write_private_file(
                temp_dir,
                &format!(".git-askpass-{}.sh", random_suffix),
                &script,
                0o700,
            )?;
            let cleanup = TempFileCleanup::new(path.clone());
            env.push(("GIT_ASKPASS".to_string(), path_str(&path)?));
            cleanup
        }
        GitAuthType::Ssh => {
            let key = creds.ssh_key.as_ref().ok_or_else(|| {
                GitOpsError::GitAuthFailed("SSH auth requires a private key".to_string())
            })?;
            let mut key_material = key.expose_secret().trim_end().to_string();
            key_material.push('\n');

            let path = write_private_file(
                temp_dir,
                &format!(".git-ssh-key-{}", random_suffix),
                &key_material,
                0o600,
            )?;
            let cleanup = TempFileCleanup::new(path.clone());

            let mut command = format!(
                "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking={}",
                shell_escape(&path_str(&path)?),
                creds.host_key_policy.ssh_option()
            );
            if creds.host_key_policy == HostKeyPolicy::Skip {
                command.push_str(" -o UserKnownHostsFile=/dev/null");
            }
            env.push(("GIT_SSH_COMMAND".to_string(), command));
            cleanup
        }
    };

    Ok(AuthEnv {
        env_vars: env,
        _cleanup: cleanup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::TokenEncryptor;
    use chrono::Utc;
    use tempfile::TempDir;

    fn env_value<'a>(auth: &'a AuthEnv, key: &str) -> Option<&'a str> {
        auth.env_vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("abc"), "abc");
        assert_eq!(shell_escape("a'b"), "a'\\''b");
    }

    #[test]
    fn test_anonymous_only_disables_prompts() {
        let dir = TempDir::new().unwrap();
        let auth = build_auth_env(&GitCredentials::anonymous(), dir.path()).unwrap();
        assert_eq!(auth.env_vars.len(), 1);
        assert_eq!(env_value(&auth, "GIT_TERMINAL_PROMPT"), Some("0"));
    }

    #[test]
    fn test_askpass_script_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let creds = GitCredentials {
            auth_type: GitAuthType::Http,
            username: Some("deploy".to_string()),
            token: Some(SecretString::from("tok'en".to_string())),
            ..Default::default()
        };
        let auth = build_auth_env(&creds, dir.path()).unwrap();
        let script_path = PathBuf::from(env_value(&auth, "GIT_ASKPASS").unwrap());
        let script = std::fs::read_to_string(&script_path).unwrap();
        assert!(script.contains("echo 'deploy'"));
        assert!(script.contains("echo 'tok'\\''en'"));

        drop(auth);
        assert!(!script_path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_ssh_key_file_and_host_key_policy() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let creds = GitCredentials {
            auth_type: GitAuthType::Ssh,
            ssh_key: Some(SecretString::from("-----BEGIN KEY-----".to_string())),
            host_key_policy: HostKeyPolicy::Strict,
            ..Default::default()
        };
        let auth = build_auth_env(&creds, dir.path()).unwrap();
        let command = env_value(&auth, "GIT_SSH_COMMAND").unwrap().to_string();
        assert!(command.contains("StrictHostKeyChecking=yes"));
        assert!(!command.contains("UserKnownHostsFile"));

        let key_file = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mode = std::fs::metadata(&key_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(auth);
        assert!(!key_file.exists());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let dir = TempDir::new().unwrap();
        let creds = GitCredentials {
            auth_type: GitAuthType::Http,
            ..Default::default()
        };
        assert!(matches!(
            build_auth_env(&creds, dir.path()),
            Err(GitOpsError::GitAuthFailed(_))
        ));
    }

    #[test]
    fn test_from_repository_decrypts_matching_secret() {
        let encryptor = TokenEncryptor::from_hex_key(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
        )
        .unwrap();
        let now = Utc::now();
        let repo = GitRepository {
            id: "r1".to_string(),
            name: "stacks".to_string(),
            url: "https://git.example.com/ops/stacks.git".to_string(),
            auth_type: GitAuthType::Http,
            username: None,
            encrypted_token: Some(encryptor.encrypt("s3cret").unwrap()),
            encrypted_ssh_key: None,
            host_key_policy: HostKeyPolicy::AcceptNew,
            description: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        let creds = GitCredentials::from_repository(&repo, &encryptor).unwrap();
        assert_eq!(creds.token.unwrap().expose_secret(), "s3cret");
        assert!(creds.ssh_key.is_none());
    }
}
