#![doc = "GitHub transport: implements the core `CommentTransport` contract over the REST API with reqwest."]
//
//! # GitHub comment transport
//!
//! [`GitHubClient`] creates issue comments on pull requests through
//! `POST {base}/repos/{owner}/{repo}/issues/{number}/comments`. It makes exactly one
//! request per call and reports the rate limit headers of every response; retries and
//! waits are the business of [`diff_preview_comment_core::DeliveryClient`].
//!
//! The base URL defaults to `https://api.github.com` and can point at a GitHub
//! Enterprise instance or a local test server.

use async_trait::async_trait;
use diff_preview_comment_core::contract::classify_status;
use diff_preview_comment_core::{AttemptError, CommentTransport, PullRequestRef, RateLimitInfo};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use serde::Serialize;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

use crate::version::VERSION;

const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Builds a client whose requests time out after `request_timeout`.
    ///
    /// `token` may be `None` for dry runs, in which case any attempt to post fails.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("diff-preview-comment/{VERSION}"))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        tracing::info!(
            base_url = %base_url,
            token_set = token.is_some(),
            timeout_ms = request_timeout.as_millis() as u64,
            "Initialized GitHub client"
        );
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn comments_url(&self, destination: &PullRequestRef) -> String {
        format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, destination.owner, destination.repo, destination.number
        )
    }
}

/// Reads `X-RateLimit-Remaining` and `X-RateLimit-Reset` (unix seconds). Missing or
/// unparsable headers are left as `None`.
pub fn rate_limit_from_headers(headers: &HeaderMap) -> RateLimitInfo {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    RateLimitInfo {
        remaining: read(RATE_LIMIT_REMAINING),
        reset_at: read(RATE_LIMIT_RESET)
            .and_then(|secs| SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs))),
    }
}

#[async_trait]
impl CommentTransport for GitHubClient {
    async fn create_comment(
        &self,
        destination: &PullRequestRef,
        body: &str,
    ) -> Result<RateLimitInfo, AttemptError> {
        let Some(token) = self.token.as_deref() else {
            error!("Refusing to post without a GitHub token");
            return Err(AttemptError::fatal("no GitHub token configured"));
        };

        let url = self.comments_url(destination);
        debug!(url = %url, bytes = body.len(), "Posting comment");

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("token {token}"))
            .header(ACCEPT, GITHUB_ACCEPT)
            .json(&CommentRequest { body })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url = %url, "Failed to execute request");
                if e.is_builder() {
                    AttemptError::fatal(format!("failed to create request: {e}"))
                } else {
                    AttemptError::transient(None, format!("failed to execute request: {e}"))
                }
            })?;

        let status = response.status();
        let rate_limit = rate_limit_from_headers(response.headers());
        let text = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        classify_status(status.as_u16(), &rate_limit, &text).map_err(|e| {
            error!(status = status.as_u16(), error = %e, "GitHub rejected the comment");
            e
        })?;
        Ok(rate_limit)
    }
}
