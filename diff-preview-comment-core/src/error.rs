//! Error types for splitting and delivery.
//!
//! Delivery failures carry an [`ErrorKind`] so the retry loop can branch on data:
//!
//! - **Transient** errors are retried with backoff (network errors, non-2xx statuses)
//! - **RateLimited** errors wait until the reported reset time before the next attempt
//! - **Fatal** errors stop delivery immediately (the request could not even be built)

use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Why a document could not be split.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("could not find a <details> section in the document, nothing to split on")]
    NoSections,

    #[error("max length too small to split document (effective content space: {available} bytes)")]
    BudgetTooSmall { available: i64 },
}

/// Classification of a single failed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,

    /// The provider reported zero remaining quota. `reset_at` is when it refills,
    /// if the response said so.
    RateLimited { reset_at: Option<SystemTime> },

    Fatal,
}

/// One failed attempt at creating a comment.
#[derive(Debug, Error)]
pub struct AttemptError {
    pub kind: ErrorKind,

    /// The HTTP status code, if a response was received.
    pub status: Option<u16>,

    pub message: String,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.status) {
            (ErrorKind::RateLimited { .. }, _) => {
                write!(f, "rate limit exceeded: {}", self.message)
            }
            (_, Some(code)) => write!(f, "GitHub API error (status {code}): {}", self.message),
            (_, None) => write!(f, "{}", self.message),
        }
    }
}

impl AttemptError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status,
            message: message.into(),
        }
    }

    pub fn rate_limited(status: u16, reset_at: Option<SystemTime>) -> Self {
        let message = match reset_at.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok()) {
            Some(reset) => format!("resets at unix time {}", reset.as_secs()),
            None => "reset time unknown".to_string(),
        };
        Self {
            kind: ErrorKind::RateLimited { reset_at },
            status: Some(status),
            message,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            status: None,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, ErrorKind::RateLimited { .. })
    }
}

/// Terminal outcome of a delivery that did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to post comment after {retries} retries ({attempts} attempts): {last}")]
    Exhausted {
        attempts: u32,
        retries: u32,
        #[source]
        last: AttemptError,
    },

    #[error("failed to post comment: {0}")]
    Fatal(#[source] AttemptError),
}

impl DeliveryError {
    /// The error observed on the final attempt.
    pub fn last_error(&self) -> &AttemptError {
        match self {
            DeliveryError::Exhausted { last, .. } => last,
            DeliveryError::Fatal(e) => e,
        }
    }
}

/// Failure of a whole publish run.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to split diff document: {0}")]
    Split(#[from] SplitError),

    #[error("failed to post comment part {part} of {total_parts}: {source}")]
    Delivery {
        part: usize,
        total_parts: usize,
        #[source]
        source: DeliveryError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn attempt_error_display_includes_status() {
        let err = AttemptError::transient(Some(502), "bad gateway");
        assert_eq!(err.to_string(), "GitHub API error (status 502): bad gateway");

        let err = AttemptError::transient(None, "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }

    #[test]
    fn rate_limited_error_reports_reset_time() {
        let reset = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let err = AttemptError::rate_limited(403, Some(reset));
        assert!(err.is_rate_limited());
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: resets at unix time 1700000000"
        );
        assert_eq!(err.kind, ErrorKind::RateLimited { reset_at: Some(reset) });
    }

    #[test]
    fn exhausted_error_exposes_last_attempt() {
        let err = DeliveryError::Exhausted {
            attempts: 4,
            retries: 3,
            last: AttemptError::transient(Some(500), "boom"),
        };
        assert_eq!(err.last_error().status, Some(500));
        assert!(err.to_string().contains("after 3 retries"));
    }
}
