//! Retrying comment delivery.
//!
//! [`DeliveryClient::deliver`] posts one fragment, retrying transient failures and
//! waiting out rate limit windows. The retry loop is a small state machine:
//!
//! ```text
//!            ┌──────────── success ─────────────► Succeeded
//!            │
//! Attempting ┼── transient, attempts left ──► BackingOff ──► Attempting
//!            │
//!            ├── rate limited, attempts left ─► RateLimitWaiting ──► Attempting
//!            │
//!            └── fatal, or no attempts left ──► Exhausted
//! ```
//!
//! Every transition back to `Attempting` uses up one of the `max_retries` slots,
//! including the one after a rate limit wait. The rate limit wait replaces the
//! backoff sleep for that transition.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::{Clock, CommentTransport, PullRequestRef, RateLimitInfo};
use crate::error::{AttemptError, DeliveryError, ErrorKind};

/// Slack added on top of the provider's reset time before retrying.
pub const RATE_LIMIT_BUFFER: Duration = Duration::from_secs(1);

/// How hard to try before giving up on a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Per request, enforced by the transport.
    pub request_timeout: Duration,
}

impl DeliveryPolicy {
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        backoff_factor: 2.0,
        request_timeout: Duration::from_secs(30),
    };

    /// Sleep before retry `attempt` (1-based): `initial_delay * attempt * backoff_factor`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * f64::from(attempt) * self.backoff_factor;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// What a successful delivery looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Requests made, 0 in dry-run mode.
    pub attempts: u32,
    pub rate_limit: RateLimitInfo,
}

#[derive(Debug)]
enum DeliveryState {
    Attempting { attempt: u32 },
    BackingOff { attempt: u32 },
    RateLimitWaiting { attempt: u32, wait: Duration },
    Succeeded { attempt: u32, rate_limit: RateLimitInfo },
    Exhausted { attempt: u32, last: AttemptError },
}

/// Posts fragments through a [`CommentTransport`], retrying according to a [`DeliveryPolicy`].
pub struct DeliveryClient<T, C> {
    transport: T,
    clock: C,
    policy: DeliveryPolicy,
    dry_run: bool,
}

impl<T, C> DeliveryClient<T, C>
where
    T: CommentTransport,
    C: Clock,
{
    pub fn new(transport: T, clock: C, policy: DeliveryPolicy, dry_run: bool) -> Self {
        Self {
            transport,
            clock,
            policy,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Posts `body` as a new comment on `destination`.
    ///
    /// In dry-run mode nothing is sent and the call always succeeds.
    pub async fn deliver(
        &self,
        destination: &PullRequestRef,
        body: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if self.dry_run {
            info!(
                pr = %destination,
                bytes = body.len(),
                "[DRY RUN] Would post comment"
            );
            debug!(pr = %destination, content = %body, "[DRY RUN] Comment content");
            return Ok(DeliveryReceipt {
                attempts: 0,
                rate_limit: RateLimitInfo::default(),
            });
        }

        let max_retries = self.policy.max_retries;
        let mut state = DeliveryState::Attempting { attempt: 0 };
        loop {
            state = match state {
                DeliveryState::Attempting { attempt } => {
                    match self.transport.create_comment(destination, body).await {
                        Ok(rate_limit) => DeliveryState::Succeeded {
                            attempt,
                            rate_limit,
                        },
                        Err(err) => self.after_failure(attempt, err),
                    }
                }
                DeliveryState::BackingOff { attempt } => {
                    let delay = self.policy.backoff_for_attempt(attempt);
                    warn!(
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying comment post after backoff"
                    );
                    self.clock.sleep(delay).await;
                    DeliveryState::Attempting { attempt }
                }
                DeliveryState::RateLimitWaiting { attempt, wait } => {
                    warn!(
                        attempt,
                        max_retries,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting for the quota to reset"
                    );
                    self.clock.sleep(wait).await;
                    DeliveryState::Attempting { attempt }
                }
                DeliveryState::Succeeded {
                    attempt,
                    rate_limit,
                } => {
                    info!(pr = %destination, attempts = attempt + 1, "Successfully posted comment");
                    debug!(
                        remaining = ?rate_limit.remaining,
                        reset_at = ?rate_limit.reset_at,
                        "Rate limit after post"
                    );
                    return Ok(DeliveryReceipt {
                        attempts: attempt + 1,
                        rate_limit,
                    });
                }
                DeliveryState::Exhausted { attempt, last } => {
                    if last.kind == ErrorKind::Fatal {
                        return Err(DeliveryError::Fatal(last));
                    }
                    return Err(DeliveryError::Exhausted {
                        attempts: attempt + 1,
                        retries: max_retries,
                        last,
                    });
                }
            };
        }
    }

    /// Decides where a failed attempt goes next.
    fn after_failure(&self, attempt: u32, err: AttemptError) -> DeliveryState {
        if err.kind == ErrorKind::Fatal {
            warn!(error = %err, "Comment post failed permanently");
            return DeliveryState::Exhausted { attempt, last: err };
        }
        if attempt >= self.policy.max_retries {
            warn!(error = %err, attempt, "Comment post failed, no retries left");
            return DeliveryState::Exhausted { attempt, last: err };
        }

        let next = attempt + 1;
        match err.kind {
            ErrorKind::RateLimited { reset_at } => {
                let until_reset = reset_at
                    .and_then(|reset| reset.duration_since(self.clock.now()).ok())
                    .unwrap_or(Duration::ZERO);
                DeliveryState::RateLimitWaiting {
                    attempt: next,
                    wait: until_reset + RATE_LIMIT_BUFFER,
                }
            }
            _ => {
                warn!(error = %err, "Failed to post comment");
                DeliveryState::BackingOff { attempt: next }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{MockClock, MockCommentTransport};
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    fn pr() -> PullRequestRef {
        PullRequestRef::new("owner", "repo", 123)
    }

    fn recording_clock(now: SystemTime) -> (MockClock, Arc<Mutex<Vec<Duration>>>) {
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let recorded = sleeps.clone();
        let mut clock = MockClock::new();
        clock.expect_now().returning(move || now);
        clock
            .expect_sleep()
            .returning(move |d| recorded.lock().unwrap().push(d));
        (clock, sleeps)
    }

    #[test]
    fn backoff_is_linear_in_attempt_and_scaled_by_factor() {
        let policy = DeliveryPolicy::DEFAULT;
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(12));

        let policy = DeliveryPolicy {
            initial_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            ..DeliveryPolicy::DEFAULT
        };
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn dry_run_never_touches_transport() {
        let mut transport = MockCommentTransport::new();
        transport.expect_create_comment().never();
        let mut clock = MockClock::new();
        clock.expect_sleep().never();

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, true);
        let receipt = client.deliver(&pr(), "hello").await.unwrap();
        assert_eq!(receipt.attempts, 0);
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let mut transport = MockCommentTransport::new();
        transport
            .expect_create_comment()
            .times(1)
            .returning(|dest, body| {
                assert_eq!(dest.number, 123);
                assert_eq!(body, "hello");
                Ok(RateLimitInfo {
                    remaining: Some(4999),
                    reset_at: None,
                })
            });
        let (clock, sleeps) = recording_clock(SystemTime::now());

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        let receipt = client.deliver(&pr(), "hello").await.unwrap();

        assert_eq!(receipt.attempts, 1);
        assert_eq!(receipt.rate_limit.remaining, Some(4999));
        assert!(sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_every_attempt_follows_backoff_schedule() {
        let mut transport = MockCommentTransport::new();
        transport
            .expect_create_comment()
            .times(4)
            .returning(|_, _| Err(AttemptError::transient(Some(502), "bad gateway")));
        let (clock, sleeps) = recording_clock(SystemTime::now());

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        let err = client.deliver(&pr(), "hello").await.unwrap_err();

        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(12)
            ]
        );
        match err {
            DeliveryError::Exhausted {
                attempts,
                retries,
                last,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(retries, 3);
                assert_eq!(last.status, Some(502));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut transport = MockCommentTransport::new();
        transport.expect_create_comment().returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n < 3 {
                Err(AttemptError::transient(None, "connection reset"))
            } else {
                Ok(RateLimitInfo::default())
            }
        });
        let (clock, sleeps) = recording_clock(SystemTime::now());

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        let receipt = client.deliver(&pr(), "hello").await.unwrap();

        assert_eq!(receipt.attempts, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![Duration::from_secs(4), Duration::from_secs(8)]
        );
    }

    #[tokio::test]
    async fn rate_limit_waits_until_reset_plus_buffer() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let reset = now + Duration::from_secs(10);

        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut transport = MockCommentTransport::new();
        transport.expect_create_comment().returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(AttemptError::rate_limited(403, Some(reset)))
            } else {
                Ok(RateLimitInfo::default())
            }
        });
        let (clock, sleeps) = recording_clock(now);

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        let receipt = client.deliver(&pr(), "hello").await.unwrap();

        assert_eq!(receipt.attempts, 2);
        assert_eq!(*sleeps.lock().unwrap(), vec![Duration::from_secs(11)]);
    }

    #[tokio::test]
    async fn rate_limit_with_reset_in_past_waits_only_buffer() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let reset = now - Duration::from_secs(30);

        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        let mut transport = MockCommentTransport::new();
        transport.expect_create_comment().returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(AttemptError::rate_limited(429, Some(reset)))
            } else {
                Ok(RateLimitInfo::default())
            }
        });
        let (clock, sleeps) = recording_clock(now);

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        client.deliver(&pr(), "hello").await.unwrap();

        assert_eq!(*sleeps.lock().unwrap(), vec![RATE_LIMIT_BUFFER]);
    }

    #[tokio::test]
    async fn rate_limit_waits_consume_retry_slots() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let reset = now + Duration::from_secs(5);

        let mut transport = MockCommentTransport::new();
        transport
            .expect_create_comment()
            .times(3)
            .returning(move |_, _| Err(AttemptError::rate_limited(403, Some(reset))));
        let (clock, sleeps) = recording_clock(now);

        let policy = DeliveryPolicy {
            max_retries: 2,
            ..DeliveryPolicy::DEFAULT
        };
        let client = DeliveryClient::new(transport, clock, policy, false);
        let err = client.deliver(&pr(), "hello").await.unwrap_err();

        assert!(err.last_error().is_rate_limited());
        // No wait after the final attempt.
        assert_eq!(
            *sleeps.lock().unwrap(),
            vec![Duration::from_secs(6), Duration::from_secs(6)]
        );
    }

    #[tokio::test]
    async fn fatal_error_stops_without_retry() {
        let mut transport = MockCommentTransport::new();
        transport
            .expect_create_comment()
            .times(1)
            .returning(|_, _| Err(AttemptError::fatal("invalid header value")));
        let (clock, sleeps) = recording_clock(SystemTime::now());

        let client = DeliveryClient::new(transport, clock, DeliveryPolicy::DEFAULT, false);
        let err = client.deliver(&pr(), "hello").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Fatal(_)));
        assert!(sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let mut transport = MockCommentTransport::new();
        transport
            .expect_create_comment()
            .times(1)
            .returning(|_, _| Err(AttemptError::transient(Some(500), "oops")));
        let (clock, sleeps) = recording_clock(SystemTime::now());

        let policy = DeliveryPolicy {
            max_retries: 0,
            ..DeliveryPolicy::DEFAULT
        };
        let client = DeliveryClient::new(transport, clock, policy, false);
        let err = client.deliver(&pr(), "hello").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Exhausted { attempts: 1, .. }));
        assert!(sleeps.lock().unwrap().is_empty());
    }
}
