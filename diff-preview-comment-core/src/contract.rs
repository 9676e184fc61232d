//! # contract: interfaces between the delivery logic and the outside world
//!
//! The delivery client never talks to the network or the system clock directly.
//! It goes through two traits defined here:
//!
//! - [`CommentTransport`]: creates one comment on a pull request thread and reports
//!   the provider's rate limit metadata. The binary crate implements it with reqwest.
//! - [`Clock`]: reads the current time and sleeps. [`TokioClock`] is the real one.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`, so tests can script responses and record
//!   every sleep without waiting in real time.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use mockall::automock;
use serde::Serialize;

use crate::error::AttemptError;

/// Coordinates of the pull request thread a comment is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Rate limit metadata reported alongside a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests left in the current window.
    pub remaining: Option<u64>,
    /// When the window resets.
    pub reset_at: Option<SystemTime>,
}

impl RateLimitInfo {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Creates comments on a pull request thread.
///
/// Implementations classify failures into an [`AttemptError`]: a 403/429 with zero
/// remaining quota must come back as [`crate::ErrorKind::RateLimited`], every other
/// network or HTTP failure as [`crate::ErrorKind::Transient`]. Retrying is the
/// caller's job, an implementation makes exactly one request per call.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CommentTransport: Send + Sync {
    async fn create_comment(
        &self,
        destination: &PullRequestRef,
        body: &str,
    ) -> Result<RateLimitInfo, AttemptError>;
}

/// Time source and sleep primitive.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Classifies a response status: returns the attempt error for anything that is not 2xx.
///
/// Transports share this so every implementation treats rate limiting the same way.
pub fn classify_status(
    status: u16,
    rate_limit: &RateLimitInfo,
    body: &str,
) -> Result<(), AttemptError> {
    if (status == 403 || status == 429) && rate_limit.is_exhausted() {
        return Err(AttemptError::rate_limited(status, rate_limit.reset_at));
    }
    if !(200..300).contains(&status) {
        return Err(AttemptError::transient(Some(status), body.trim()));
    }
    Ok(())
}
