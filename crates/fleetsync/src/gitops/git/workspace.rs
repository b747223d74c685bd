//! Scratch checkouts.

use std::path::{Component, Path, PathBuf};

use crate::gitops::error::{GitOpsError, Result};

/// A per-execution scratch directory that is removed when dropped.
///
/// Every clone gets its own uniquely named directory, so concurrent runs
/// never share a checkout. Dropping the guard on any exit path (error,
/// cancellation, panic unwind) removes the directory.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Creates `root/<prefix>-<uuid>`.
    pub fn create(root: &Path, prefix: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let path = root.join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir(&path)?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a repository-relative path inside the workspace. Absolute
    /// paths and `..` components are rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        validate_relative_path(relative)?;
        Ok(self.path.join(relative))
    }

    /// Removes the directory now and reports failures.
    pub fn cleanup(mut self) -> Result<()> {
        self.removed = true;
        std::fs::remove_dir_all(&self.path)?;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove workspace {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

/// Accepts non-empty relative paths that stay inside the repository.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(GitOpsError::Validation("path must not be empty".to_string()));
    }
    if trimmed.contains('\0') {
        return Err(GitOpsError::PathTraversal(path.to_string()));
    }

    let candidate = Path::new(trimmed);
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GitOpsError::PathTraversal(path.to_string()));
            }
        }
    }
    Ok(())
}

/// Path of the `.env` file next to `compose_path`.
pub fn sibling_env_path(compose_path: &str) -> String {
    match compose_path.rfind('/') {
        Some(idx) => format!("{}/.env", &compose_path[..idx]),
        None => ".env".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(root.path(), "sync").unwrap();
        let path = ws.path().to_path_buf();
        std::fs::write(path.join("file"), "x").unwrap();
        assert!(path.exists());

        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_workspaces_are_unique() {
        let root = TempDir::new().unwrap();
        let a = Workspace::create(root.path(), "sync").unwrap();
        let b = Workspace::create(root.path(), "sync").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_explicit_cleanup() {
        let root = TempDir::new().unwrap();
        let ws = Workspace::create(root.path(), "sync").unwrap();
        let path = ws.path().to_path_buf();
        ws.cleanup().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_relative_path() {
        assert!(validate_relative_path("docker-compose.yml").is_ok());
        assert!(validate_relative_path("stacks/web/compose.yaml").is_ok());
        assert!(validate_relative_path("./compose.yaml").is_ok());
        assert!(matches!(
            validate_relative_path("../secrets"),
            Err(GitOpsError::PathTraversal(_))
        ));
        assert!(matches!(
            validate_relative_path("stacks/../../etc/passwd"),
            Err(GitOpsError::PathTraversal(_))
        ));
        assert!(matches!(
            validate_relative_path("/etc/passwd"),
            Err(GitOpsError::PathTraversal(_))
        ));
        assert!(matches!(
            validate_relative_path("  "),
            Err(GitOpsError::Validation(_))
        ));
    }

    #[test]
    fn test_sibling_env_path() {
        assert_eq!(sibling_env_path("docker-compose.yml"), ".env");
        assert_eq!(sibling_env_path("stacks/web/compose.yaml"), "stacks/web/.env");
    }
}
