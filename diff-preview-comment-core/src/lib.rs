#![doc = "diff-preview-comment-core: core logic library for diff-preview-comment."]

//! This crate contains the document splitter, the retrying comment delivery client
//! and the orchestration that ties them together.
//! Nothing in here talks HTTP or parses command lines: transports and clocks are
//! injected through the traits in [`contract`].
//!
//! # Usage
//! Build a [`delivery::DeliveryClient`] around a [`contract::CommentTransport`] and hand
//! it to [`publish::publish`] together with the rendered report.

pub mod contract;
pub mod delivery;
pub mod error;
pub mod publish;
pub mod splitter;

pub use contract::{Clock, CommentTransport, PullRequestRef, RateLimitInfo, TokioClock};
pub use delivery::{DeliveryClient, DeliveryPolicy, DeliveryReceipt};
pub use error::{AttemptError, DeliveryError, ErrorKind, PublishError, SplitError};
pub use publish::{publish, PartReport, PublishReport, INTER_POST_DELAY};
pub use splitter::{split, Fragment, DEFAULT_MAX_COMMENT_LENGTH};
