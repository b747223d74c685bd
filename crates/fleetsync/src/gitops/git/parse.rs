//! Git output parsing helpers.

use std::process::Output;

use serde::Serialize;

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// One line of `git ls-remote --heads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBranch {
    pub name: String,
    pub commit: String,
}

/// Parses `<sha>\trefs/heads/<branch>` lines; anything else is skipped.
pub fn parse_ls_remote(output: &str) -> Vec<RemoteBranch> {
    output
        .lines()
        .filter_map(|line| {
            let (commit, reference) = line.split_once('\t')?;
            let name = reference.trim().strip_prefix("refs/heads/")?;
            Some(RemoteBranch {
                name: name.to_string(),
                commit: commit.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_remote() {
        let output = "3f2a1b\trefs/heads/main\n9c8d7e\trefs/heads/release/1.x\nabcdef\trefs/tags/v1\n\n";
        let branches = parse_ls_remote(output);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].name, "main");
        assert_eq!(branches[0].commit, "3f2a1b");
        assert_eq!(branches[1].name, "release/1.x");
    }

    #[cfg(unix)]
    mod unix_tests {
        use super::*;
        use std::os::unix::process::ExitStatusExt;
        use std::process::ExitStatus;

        fn make_output(status_code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
            Output {
                status: ExitStatus::from_raw(status_code << 8),
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
            }
        }

        #[test]
        fn test_format_git_error_empty_output() {
            let output = make_output(128, b"", b"");
            assert_eq!(format_git_error(&output), "Command failed with exit code 128");
        }

        #[test]
        fn test_format_git_error_prefers_stderr() {
            let output = make_output(128, b"", b"fatal: repository not found\n");
            assert_eq!(format_git_error(&output), "fatal: repository not found");
        }
    }
}
