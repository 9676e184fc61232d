//! Build information shown by the `version` subcommand.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit the binary was built from, injected at build time.
pub const COMMIT: &str = match option_env!("DIFF_PREVIEW_COMMENT_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

pub const DESCRIPTION: &str = "A CLI tool to process ArgoCD diffs and post them as PR comments";

/// `0.1.0 (commit: abc123)`
pub fn full_version() -> String {
    format!("{VERSION} (commit: {COMMIT})")
}

pub fn info() -> String {
    format!("Version: {VERSION}\nCommit: {COMMIT}\nDescription: {DESCRIPTION}")
}
