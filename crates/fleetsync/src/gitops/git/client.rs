//! Git client capability and its `git` CLI implementation.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::auth::{build_auth_env, AuthEnv, GitCredentials};
use super::parse::{format_git_error, parse_ls_remote, RemoteBranch};
use super::workspace::Workspace;
use crate::gitops::error::{classify_git_error, GitOpsError, Result};
use crate::sanitize::redact_url;

/// Narrow git capability used by GitOps runs.
///
/// File helpers default to reading the checkout from disk, so an
/// implementation only has to produce a populated [`Workspace`].
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Shallow-clones `branch` of `url` into a fresh workspace.
    async fn clone_repo(&self, url: &str, branch: &str, creds: &GitCredentials)
        -> Result<Workspace>;

    /// Commit hash checked out in `workspace`.
    async fn current_commit(&self, workspace: &Workspace) -> Result<String>;

    /// Branches advertised by the remote.
    async fn ls_remote(&self, url: &str, creds: &GitCredentials) -> Result<Vec<RemoteBranch>>;

    async fn file_exists(&self, workspace: &Workspace, path: &str) -> Result<bool> {
        Ok(workspace.resolve(path)?.is_file())
    }

    async fn read_file(&self, workspace: &Workspace, path: &str) -> Result<String> {
        let full = workspace.resolve(path)?;
        std::fs::read_to_string(&full).map_err(|source| GitOpsError::ReadFile {
            path: PathBuf::from(path),
            source,
        })
    }

    /// Files below `dir` (recursively, `.git` excluded), relative to the
    /// repository root and sorted.
    async fn list_files(&self, workspace: &Workspace, dir: &str) -> Result<Vec<String>> {
        let start = if dir.trim().is_empty() || dir.trim() == "." {
            workspace.path().to_path_buf()
        } else {
            workspace.resolve(dir)?
        };
        let mut files = Vec::new();
        collect_files(workspace.path(), &start, &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

/// Runs the `git` binary. Every invocation is bounded by `timeout` and the
/// child is killed if the future is dropped.
pub struct CliGitClient {
    binary: String,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl CliGitClient {
    pub fn new(workspace_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: "git".to_string(),
            workspace_root: workspace_root.into(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    async fn run_git(
        &self,
        operation: &'static str,
        args: &[&str],
        cwd: Option<&Path>,
        auth: &AuthEnv,
    ) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &auth.env_vars {
            cmd.env(key, value);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitOpsError::Timeout {
                operation,
                timeout: self.timeout,
            })?
            .map_err(|e| GitOpsError::GitOperation(format!("failed to run git: {}", e)))?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        creds: &GitCredentials,
    ) -> Result<Workspace> {
        let workspace = Workspace::create(&self.workspace_root, "sync")?;
        let auth = build_auth_env(creds, &std::env::temp_dir())?;
        let target = workspace.path().to_string_lossy().into_owned();

        log::debug!(
            "Cloning {} (branch {}) into {}",
            redact_url(url),
            branch,
            target
        );
        self.run_git(
            "git clone",
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                branch,
                "--single-branch",
                "--",
                url,
                target.as_str(),
            ],
            None,
            &auth,
        )
        .await?;

        Ok(workspace)
    }

    async fn current_commit(&self, workspace: &Workspace) -> Result<String> {
        let auth = build_auth_env(&GitCredentials::anonymous(), &std::env::temp_dir())?;
        let output = self
            .run_git(
                "git rev-parse",
                &["rev-parse", "HEAD"],
                Some(workspace.path()),
                &auth,
            )
            .await?;
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(GitOpsError::GitOperation(
                "rev-parse returned no commit".to_string(),
            ));
        }
        Ok(commit)
    }

    async fn ls_remote(&self, url: &str, creds: &GitCredentials) -> Result<Vec<RemoteBranch>> {
        let auth = build_auth_env(creds, &std::env::temp_dir())?;
        let output = self
            .run_git("git ls-remote", &["ls-remote", "--heads", "--", url], None, &auth)
            .await?;
        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_helpers_read_workspace() {
        let root = TempDir::new().unwrap();
        let client = CliGitClient::new(root.path(), Duration::from_secs(5));
        let ws = Workspace::create(root.path(), "sync").unwrap();
        std::fs::create_dir_all(ws.path().join("stacks/web")).unwrap();
        std::fs::create_dir_all(ws.path().join(".git")).unwrap();
        std::fs::write(ws.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::write(ws.path().join("stacks/web/compose.yaml"), "services: {}\n").unwrap();
        std::fs::write(ws.path().join("stacks/web/.env"), "A=1\n").unwrap();
        std::fs::write(ws.path().join("README.md"), "hi").unwrap();

        assert!(client
            .file_exists(&ws, "stacks/web/compose.yaml")
            .await
            .unwrap());
        assert!(!client.file_exists(&ws, "stacks/web").await.unwrap());
        assert!(client.file_exists(&ws, "../outside").await.is_err());
        assert_eq!(
            client.read_file(&ws, "stacks/web/.env").await.unwrap(),
            "A=1\n"
        );

        let all = client.list_files(&ws, "").await.unwrap();
        assert_eq!(
            all,
            vec!["README.md", "stacks/web/.env", "stacks/web/compose.yaml"]
        );
        let web = client.list_files(&ws, "stacks/web").await.unwrap();
        assert_eq!(web.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_binary_is_git_operation_error() {
        let root = TempDir::new().unwrap();
        let client = CliGitClient::new(root.path(), Duration::from_secs(5))
            .with_binary("fleetsync-no-such-git-binary");

        let err = client
            .clone_repo(
                "https://git.example.com/x.git",
                "main",
                &GitCredentials::anonymous(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitOpsError::GitOperation(_)));

        // The failed clone's workspace is gone.
        let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
