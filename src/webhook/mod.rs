//! # Webhook Pipeline
//!
//! Inbound tracker webhooks are queued by the HTTP boundary and processed by a
//! fixed pool of workers. Each message goes through the same stages:
//!
//! 1. [`parser`] turns the raw payload into a [`parser::ParsedWebhook`];
//! 2. [`notifications`] sends direct messages (assignments, mentions);
//! 3. [`expand`] fetches the full issue when the payload only carries a stub;
//! 4. [`subscriptions`] selects the channel subscriptions whose filters match;
//! 5. for each subscription, [`permissions`] confirms the subscription owner may
//!    see the issue, [`roles`] applies the owner's role restriction and
//!    [`formatter`] renders the channel post.
//!
//! Failures are isolated per recipient and per message; see [`worker`].

use thiserror::Error;

use crate::chat::ChatError;
use crate::repositories::RepositoryError;
use crate::tracker::TrackerError;

pub mod expand;
pub mod formatter;
pub mod notifications;
pub mod parser;
pub mod permissions;
pub mod roles;
pub mod subscriptions;
pub mod worker;

pub use parser::{ParsedWebhook, WebhookEvent, parse_webhook};
pub use worker::{
    EnqueueError, WebhookMessage, WebhookPipeline, WebhookProcessor, WebhookQueue, WorkerPool,
    WorkerPoolStats,
};

/// Errors raised while processing a single webhook message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("unsupported webhook event '{0}'")]
    UnsupportedEventKind(String),
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("tracker unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("permission denied for {recipient}: {reason}")]
    PermissionDenied { recipient: String, reason: String },
    #[error("failed to post notification: {0}")]
    PostFailed(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("webhook processing panicked: {0}")]
    ProcessingPanicked(String),
}

impl From<TrackerError> for WebhookError {
    fn from(err: TrackerError) -> Self {
        WebhookError::UpstreamUnavailable(err.to_string())
    }
}

impl From<ChatError> for WebhookError {
    fn from(err: ChatError) -> Self {
        WebhookError::PostFailed(err.to_string())
    }
}

impl From<RepositoryError> for WebhookError {
    fn from(err: RepositoryError) -> Self {
        WebhookError::StoreUnavailable(err.to_string())
    }
}

/// Why a message finished without doing anything. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedEvent(String),
    NoRelevantChanges,
}

/// Counts gathered while fanning a message out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub channel_posts: usize,
    pub direct_notifications: usize,
    pub skipped_legacy: usize,
    pub skipped_self: usize,
    pub permission_denied: usize,
    /// Creator holds none of the subscription's required roles.
    pub skipped_role: usize,
    pub post_failures: usize,
}

/// Result of processing one webhook message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Posted(DeliveryReport),
    Ignored(IgnoreReason),
    Failed(WebhookError),
}

impl ProcessOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::Posted(_) => "posted",
            ProcessOutcome::Ignored(_) => "ignored",
            ProcessOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessOutcome::Failed(_))
    }
}
