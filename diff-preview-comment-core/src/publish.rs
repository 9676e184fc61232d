//! Splits a report and posts every fragment in order.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::contract::{Clock, CommentTransport, PullRequestRef, RateLimitInfo};
use crate::delivery::DeliveryClient;
use crate::error::PublishError;
use crate::splitter::split;

/// Pause between two consecutive posts.
pub const INTER_POST_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartReport {
    pub part_number: usize,
    pub size: usize,
    /// 0 in dry-run mode.
    pub attempts: u32,
    #[serde(skip)]
    pub rate_limit: RateLimitInfo,
}

/// Summary of a completed publish run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub destination: PullRequestRef,
    pub total_parts: usize,
    pub parts: Vec<PartReport>,
    pub dry_run: bool,
}

/// Splits `document` into fragments of at most `max_bytes` and posts them to
/// `destination`, one after another.
///
/// Nothing is posted if splitting fails. A part that cannot be delivered aborts
/// the run, and later parts are not attempted.
pub async fn publish<T, C, K>(
    document: &str,
    destination: &PullRequestRef,
    max_bytes: usize,
    client: &DeliveryClient<T, C>,
    clock: &K,
) -> Result<PublishReport, PublishError>
where
    T: CommentTransport,
    C: Clock,
    K: Clock + ?Sized,
{
    let fragments = split(document, max_bytes)?;
    let total_parts = fragments.len();
    info!(parts = total_parts, pr = %destination, "Split diff into parts");

    for fragment in fragments.iter().filter(|f| f.size > max_bytes) {
        warn!(
            part = fragment.part_number,
            size = fragment.size,
            max_bytes,
            "Part exceeds the maximum comment length and may be rejected"
        );
    }

    let dry_run = client.is_dry_run();
    let mut parts = Vec::with_capacity(total_parts);
    for fragment in &fragments {
        info!(
            part = fragment.part_number,
            total_parts,
            size = fragment.size,
            "Posting comment part"
        );

        let receipt = client
            .deliver(destination, &fragment.content)
            .await
            .map_err(|source| {
                error!(part = fragment.part_number, error = %source, "Giving up on comment part");
                PublishError::Delivery {
                    part: fragment.part_number,
                    total_parts,
                    source,
                }
            })?;

        parts.push(PartReport {
            part_number: fragment.part_number,
            size: fragment.size,
            attempts: receipt.attempts,
            rate_limit: receipt.rate_limit,
        });

        if !dry_run && fragment.part_number < total_parts {
            clock.sleep(INTER_POST_DELAY).await;
        }
    }

    info!(parts = total_parts, pr = %destination, dry_run, "Posted all comment parts");

    Ok(PublishReport {
        destination: destination.clone(),
        total_parts,
        parts,
        dry_run,
    })
}
