//! Parsing of pull request references given on the command line.
//!
//! Two forms are accepted:
//! - `owner/repo#123`
//! - `https://github.com/owner/repo/pull/123` (also `http://`)

use diff_preview_comment_core::PullRequestRef;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrRefError {
    #[error("invalid PR format {0:?}, expected owner/repo#number or a GitHub PR URL")]
    InvalidFormat(String),

    #[error("invalid PR number {0:?}")]
    InvalidNumber(String),
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://github\.com/([^/#\s]+)/([^/#\s]+)/pull/([^/#\s]*)/?$")
            .expect("valid PR URL regex")
    })
}

fn short_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([^/#\s]+)/([^/#\s]+)#([^/#\s]*)$").expect("valid PR reference regex")
    })
}

/// Parses `owner/repo#number` or a GitHub pull request URL.
pub fn parse_pr_ref(input: &str) -> Result<PullRequestRef, PrRefError> {
    let input = input.trim();
    let caps = url_regex()
        .captures(input)
        .or_else(|| short_regex().captures(input))
        .ok_or_else(|| PrRefError::InvalidFormat(input.to_string()))?;

    let raw_number = &caps[3];
    let number = raw_number
        .parse::<u64>()
        .map_err(|_| PrRefError::InvalidNumber(raw_number.to_string()))?;

    Ok(PullRequestRef::new(&caps[1], &caps[2], number))
}
