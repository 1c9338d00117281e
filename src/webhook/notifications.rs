//! Direct-message notifications for assignments and mentions.
//!
//! These go to individual chat users regardless of channel subscriptions.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error};

use super::WebhookError;
use super::formatter::{DirectNotice, direct_message};
use super::parser::{ParsedWebhook, WebhookEvent};
use crate::chat::ChatSink;
use crate::models::{Instance, TrackerUser};
use crate::repositories::ConnectionStore;

/// `[~accountid:5b10ac8d82e05b22cc7d4ef5]` (cloud)
static ACCOUNT_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[~accountid:([^\]\s]+)\]").expect("Invalid account mention regex")
});
/// `[~jdoe]` (server)
static NAME_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[~([^\]:\s]+)\]").expect("Invalid name mention regex"));

/// Tracker accounts mentioned in a comment body, in order of appearance.
pub fn mentioned_users(body: &str) -> Vec<TrackerUser> {
    let by_account = ACCOUNT_MENTION.captures_iter(body).map(|c| TrackerUser {
        account_id: Some(c[1].to_string()),
        ..Default::default()
    });
    let by_name = NAME_MENTION.captures_iter(body).map(|c| TrackerUser {
        name: Some(c[1].to_string()),
        ..Default::default()
    });
    by_account.chain(by_name).collect()
}

fn recipients(webhook: &ParsedWebhook) -> Vec<(TrackerUser, DirectNotice)> {
    let assignee = webhook.issue.assignee().cloned();
    let mut out = Vec::new();
    match &webhook.event {
        WebhookEvent::IssueCreated => {
            out.extend(assignee.map(|a| (a, DirectNotice::Assigned)));
        }
        WebhookEvent::IssueUpdated { .. } => {
            if webhook.event.change("assignee").is_some() {
                out.extend(assignee.map(|a| (a, DirectNotice::Assigned)));
            }
        }
        WebhookEvent::CommentCreated { comment } => {
            out.extend(
                mentioned_users(&comment.body)
                    .into_iter()
                    .map(|u| (u, DirectNotice::Mentioned)),
            );
            out.extend(assignee.map(|a| (a, DirectNotice::CommentedOnAssigned)));
        }
        WebhookEvent::CommentUpdated { comment } => {
            out.extend(
                mentioned_users(&comment.body)
                    .into_iter()
                    .map(|u| (u, DirectNotice::Mentioned)),
            );
        }
        WebhookEvent::IssueDeleted | WebhookEvent::CommentDeleted { .. } => {}
    }
    out
}

/// Sends the direct notifications a webhook implies and returns how many were sent.
///
/// The actor is never notified about their own change, users who turned
/// notifications off are skipped, and each chat user gets at most one message.
/// A failed DM is logged and does not stop the remaining recipients.
///
/// # Errors
///
/// Returns [`WebhookError::StoreUnavailable`] when the connection store fails.
pub async fn post_notifications(
    chat: &dyn ChatSink,
    connections: &dyn ConnectionStore,
    instance: &Instance,
    webhook: &ParsedWebhook,
) -> Result<usize, WebhookError> {
    if !webhook.event.post_notifications() {
        return Ok(0);
    }

    let mut notified: HashSet<String> = HashSet::new();
    let mut sent = 0;

    for (recipient, notice) in recipients(webhook) {
        if webhook
            .actor
            .as_ref()
            .is_some_and(|actor| actor.same_account(&recipient))
        {
            continue;
        }

        let chat_user_id = match connections.load_chat_user_id(&instance.id, &recipient).await {
            Ok(id) => id,
            Err(err) if err.is_not_found() => {
                debug!(
                    account = recipient.account_ref().unwrap_or(&recipient.self_url),
                    "Recipient has no connected chat user"
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if notified.contains(&chat_user_id) {
            continue;
        }

        let connection = match connections.load_connection(&instance.id, &chat_user_id).await {
            Ok(connection) => connection,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err.into()),
        };
        if !connection.settings.notifications {
            continue;
        }
        if webhook
            .actor
            .as_ref()
            .is_some_and(|actor| connection.is_actor(actor))
        {
            continue;
        }

        notified.insert(chat_user_id.clone());
        let message = direct_message(instance, webhook, notice);
        match chat.send_direct_message(&chat_user_id, &message).await {
            Ok(_) => sent += 1,
            Err(err) => error!(
                error = %err,
                chat_user_id = %chat_user_id,
                issue_key = %webhook.issue.key,
                "Failed to send direct notification"
            ),
        }
    }

    Ok(sent)
}
