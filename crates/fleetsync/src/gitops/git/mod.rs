//! Git access for GitOps runs: credentials, scratch checkouts and the CLI
//! client.

pub mod auth;
pub mod client;
pub mod parse;
pub mod workspace;

pub use auth::GitCredentials;
pub use client::{CliGitClient, GitClient};
pub use parse::RemoteBranch;
pub use workspace::{sibling_env_path, validate_relative_path, Workspace};
