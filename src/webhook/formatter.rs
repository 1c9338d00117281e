//! Chat rendering for webhook notifications and issue replies. Everything here
//! is pure; posting is the caller's job.

use super::parser::{ParsedWebhook, WebhookEvent};
use crate::models::issue::ChangelogItem;
use crate::models::{Instance, Issue, Post, SlackAttachment, SlackAttachmentField};
use crate::tracker::truncate;

const ATTACHMENT_COLOR: &str = "#95b7d0";
const MAX_BODY_CHARS: usize = 3000;

/// Why a user receives a direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectNotice {
    Assigned,
    Mentioned,
    CommentedOnAssigned,
}

/// An action reply, shown to everyone in the thread or only to the requester.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionReply {
    Public(Post),
    Ephemeral(Post),
}

/// `[KEY](browse-url)`
pub fn issue_link(instance: &Instance, issue: &Issue) -> String {
    format!("[{}]({})", issue.key, instance.browse_url(&issue.key))
}

/// `[KEY: summary](browse-url)`, or just the key when the summary is empty.
pub fn titled_link(instance: &Instance, issue: &Issue) -> String {
    if issue.summary().is_empty() {
        issue_link(instance, issue)
    } else {
        format!(
            "[{}: {}]({})",
            issue.key,
            issue.summary(),
            instance.browse_url(&issue.key)
        )
    }
}

fn issue_noun(issue: &Issue) -> String {
    issue
        .issue_type()
        .map(|t| t.name.to_lowercase())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "issue".to_string())
}

fn change_value(value: Option<&String>) -> &str {
    value.map(String::as_str).filter(|v| !v.is_empty()).unwrap_or("None")
}

/// One-line markdown description of what happened.
pub fn headline(instance: &Instance, webhook: &ParsedWebhook) -> String {
    let actor = webhook.actor_label();
    let noun = issue_noun(&webhook.issue);
    let link = issue_link(instance, &webhook.issue);

    match &webhook.event {
        WebhookEvent::IssueCreated => format!("{actor} **created** {noun} {link}"),
        WebhookEvent::IssueDeleted => format!("{actor} **deleted** {noun} {link}"),
        WebhookEvent::CommentCreated { .. } => format!("{actor} **commented** on {noun} {link}"),
        WebhookEvent::CommentUpdated { .. } => {
            format!("{actor} **edited a comment** on {noun} {link}")
        }
        WebhookEvent::CommentDeleted { .. } => {
            format!("{actor} **deleted a comment** on {noun} {link}")
        }
        WebhookEvent::IssueUpdated { changes } => {
            update_headline(actor, &noun, &link, &webhook.event, changes)
        }
    }
}

fn update_headline(
    actor: &str,
    noun: &str,
    link: &str,
    event: &WebhookEvent,
    changes: &[ChangelogItem],
) -> String {
    if let Some(item) = event.change("resolution") {
        return if item.to.as_deref().is_some_and(|v| !v.is_empty()) {
            format!("{actor} **resolved** {noun} {link}")
        } else {
            format!("{actor} **reopened** {noun} {link}")
        };
    }
    if let Some(item) = event.change("status") {
        return format!(
            "{actor} **transitioned** {noun} {link} from \"{}\" to \"{}\"",
            change_value(item.from_string.as_ref()),
            change_value(item.to_value.as_ref())
        );
    }
    if let Some(item) = event.change("assignee") {
        return match item.to_value.as_deref().filter(|v| !v.is_empty()) {
            Some(assignee) => format!("{actor} **assigned** {assignee} to {noun} {link}"),
            None => format!("{actor} **unassigned** {noun} {link}"),
        };
    }
    match changes {
        [single] => format!(
            "{actor} **updated** {} of {noun} {link}",
            single.field.to_lowercase()
        ),
        _ => format!("{actor} **updated** {noun} {link}"),
    }
}

fn update_text(changes: &[ChangelogItem]) -> String {
    changes
        .iter()
        .filter(|item| !item.field.eq_ignore_ascii_case("description"))
        .map(|item| {
            format!(
                "{}: {} → {}",
                item.field,
                change_value(item.from_string.as_ref()),
                change_value(item.to_value.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn issue_fields(issue: &Issue) -> Vec<SlackAttachmentField> {
    let Some(fields) = issue.fields.as_ref() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(status) = &fields.status {
        out.push(SlackAttachmentField {
            title: "Status".to_string(),
            value: status.name.clone(),
            short: true,
        });
    }
    if let Some(priority) = &fields.priority {
        out.push(SlackAttachmentField {
            title: "Priority".to_string(),
            value: priority.name.clone(),
            short: true,
        });
    }
    out.push(SlackAttachmentField {
        title: "Assignee".to_string(),
        value: fields
            .assignee
            .as_ref()
            .map_or_else(|| "Unassigned".to_string(), |a| a.label().to_string()),
        short: true,
    });
    out
}

/// Channel notification for one subscription.
///
/// Restricted comments are replaced by a notice unless `show_hidden` is set
/// (the subscription owner opted into displaying hidden messages).
pub fn channel_post(
    instance: &Instance,
    webhook: &ParsedWebhook,
    channel_id: &str,
    bot_user_id: &str,
    subscription_name: &str,
    show_hidden: bool,
) -> Post {
    let headline = headline(instance, webhook);
    let issue = &webhook.issue;

    let text = match &webhook.event {
        WebhookEvent::CommentCreated { comment } | WebhookEvent::CommentUpdated { comment } => {
            match &comment.visibility {
                Some(visibility) if !show_hidden => format!(
                    "_This comment is restricted to {} {}._",
                    visibility.kind, visibility.value
                ),
                _ => truncate(&comment.body, MAX_BODY_CHARS),
            }
        }
        WebhookEvent::IssueCreated => issue
            .fields
            .as_ref()
            .and_then(|f| f.description.as_deref())
            .map(|d| truncate(d, MAX_BODY_CHARS))
            .unwrap_or_default(),
        WebhookEvent::IssueUpdated { changes } => update_text(changes),
        WebhookEvent::IssueDeleted | WebhookEvent::CommentDeleted { .. } => String::new(),
    };

    let footer = if subscription_name.is_empty() {
        instance.display_name().to_string()
    } else {
        format!("Subscription: {subscription_name}")
    };

    let attachment = SlackAttachment {
        fallback: format!("{headline}: {}", issue.summary()),
        color: ATTACHMENT_COLOR.to_string(),
        pretext: headline,
        title: format!("{}: {}", issue.key, issue.summary()),
        title_link: instance.browse_url(&issue.key),
        text,
        fields: issue_fields(issue),
        footer,
    };

    Post::new(bot_user_id, channel_id, "").with_attachments(vec![attachment])
}

/// Text of a direct notification.
pub fn direct_message(instance: &Instance, webhook: &ParsedWebhook, notice: DirectNotice) -> String {
    let actor = webhook.actor_label();
    let noun = issue_noun(&webhook.issue);
    let link = titled_link(instance, &webhook.issue);
    match notice {
        DirectNotice::Assigned => format!("{actor} assigned you to {noun} {link}"),
        DirectNotice::Mentioned => {
            format!("{actor} mentioned you in a comment on {noun} {link}")
        }
        DirectNotice::CommentedOnAssigned => {
            format!("{actor} commented on {noun} {link} assigned to you")
        }
    }
}

/// Issue card used by issue views and shared issues.
pub fn issue_attachment(instance: &Instance, issue: &Issue) -> SlackAttachment {
    let mut fields = issue_fields(issue);
    if let Some(issue_type) = issue.issue_type() {
        fields.push(SlackAttachmentField {
            title: "Type".to_string(),
            value: issue_type.name.clone(),
            short: true,
        });
    }
    SlackAttachment {
        fallback: format!("{}: {}", issue.key, issue.summary()),
        color: ATTACHMENT_COLOR.to_string(),
        title: format!("{}: {}", issue.key, issue.summary()),
        title_link: instance.browse_url(&issue.key),
        text: issue
            .fields
            .as_ref()
            .and_then(|f| f.description.as_deref())
            .map(|d| truncate(d, MAX_BODY_CHARS))
            .unwrap_or_default(),
        fields,
        footer: instance.display_name().to_string(),
        ..Default::default()
    }
}

/// Reply to an issue action. Users who display hidden messages get a public
/// threaded reply mentioning them; everyone else an ephemeral post.
pub fn action_reply(
    bot_user_id: &str,
    channel_id: &str,
    root_id: &str,
    username: &str,
    message: &str,
    display_hidden_messages: bool,
) -> ActionReply {
    if display_hidden_messages && !channel_id.is_empty() {
        ActionReply::Public(
            Post::new(bot_user_id, channel_id, format!("@{username} {message}")).with_root(root_id),
        )
    } else {
        ActionReply::Ephemeral(Post::new(bot_user_id, channel_id, message))
    }
}
