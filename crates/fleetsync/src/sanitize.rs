//! Helpers for keeping credentials out of logs and normalizing names that
//! end up on disk or in `docker compose` invocations.

use std::sync::OnceLock;

use regex::Regex;

/// Strips userinfo (tokens, passwords) from a URL before it is logged.
///
/// - `https://ghp_token@github.com/user/repo` → `https://****@github.com/user/repo`
/// - `git@github.com:user/repo.git` → unchanged (no secret in scp-style URLs)
/// - `http://10.0.0.5:3552` → unchanged
pub fn redact_url(url: &str) -> String {
    if url.starts_with("git@") {
        return url.to_string();
    }

    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &url[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    url.to_string()
}

fn invalid_project_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_-]+").expect("static regex"))
}

/// Normalizes a project name into something `docker compose -p` accepts:
/// lowercase ASCII letters, digits, `-` and `_`, starting with a letter or digit.
///
/// Returns `None` when nothing usable remains.
pub fn sanitize_project_name(name: &str) -> Option<String> {
    let lowered = name.trim().to_lowercase();
    let replaced = invalid_project_chars().replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Truncates a remote response body so error messages stay readable and do
/// not echo large payloads back into sync status fields.
pub fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}
