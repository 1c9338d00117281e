//! Decoding of raw tracker webhook payloads.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::WebhookError;
use crate::models::issue::{Changelog, ChangelogItem};
use crate::models::{Comment, Issue, TrackerUser};

pub const EVENT_CREATED: &str = "event_created";
pub const EVENT_DELETED: &str = "event_deleted";
pub const EVENT_DELETED_UNRESOLVED: &str = "event_deleted_unresolved";
pub const EVENT_CREATED_COMMENT: &str = "event_created_comment";
pub const EVENT_UPDATED_COMMENT: &str = "event_updated_comment";
pub const EVENT_DELETED_COMMENT: &str = "event_deleted_comment";
pub const EVENT_UPDATED_PREFIX: &str = "event_updated_";
pub const EVENT_UPDATED_ASSIGNEE: &str = "event_updated_assignee";
pub const EVENT_UPDATED_RESOLVED: &str = "event_updated_resolved";
pub const EVENT_UPDATED_REOPENED: &str = "event_updated_reopened";

/// The kind of change a webhook reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    IssueCreated,
    IssueUpdated { changes: Vec<ChangelogItem> },
    IssueDeleted,
    CommentCreated { comment: Comment },
    CommentUpdated { comment: Comment },
    CommentDeleted { comment: Comment },
}

/// How a recipient's access to the issue is verified before a channel post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    /// The recipient must be able to read the issue itself.
    Issue,
    /// The issue is gone; the recipient must be able to browse its project.
    Project,
}

impl WebhookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WebhookEvent::IssueCreated => "issue_created",
            WebhookEvent::IssueUpdated { .. } => "issue_updated",
            WebhookEvent::IssueDeleted => "issue_deleted",
            WebhookEvent::CommentCreated { .. } => "comment_created",
            WebhookEvent::CommentUpdated { .. } => "comment_updated",
            WebhookEvent::CommentDeleted { .. } => "comment_deleted",
        }
    }

    pub fn comment(&self) -> Option<&Comment> {
        match self {
            WebhookEvent::CommentCreated { comment }
            | WebhookEvent::CommentUpdated { comment }
            | WebhookEvent::CommentDeleted { comment } => Some(comment),
            _ => None,
        }
    }

    pub fn is_comment_event(&self) -> bool {
        self.comment().is_some()
    }

    /// Whether this event can produce direct notifications.
    pub fn post_notifications(&self) -> bool {
        !matches!(
            self,
            WebhookEvent::IssueDeleted | WebhookEvent::CommentDeleted { .. }
        )
    }

    pub fn check_permissions(&self) -> PermissionScope {
        match self {
            WebhookEvent::IssueDeleted => PermissionScope::Project,
            _ => PermissionScope::Issue,
        }
    }

    /// The changelog item for `field`, when this is an update touching it.
    pub fn change(&self, field: &str) -> Option<&ChangelogItem> {
        match self {
            WebhookEvent::IssueUpdated { changes } => changes
                .iter()
                .find(|item| item.field.eq_ignore_ascii_case(field)),
            _ => None,
        }
    }
}

/// A decoded webhook, scoped to one processing pass.
#[derive(Debug, Clone)]
pub struct ParsedWebhook {
    pub event: WebhookEvent,
    pub issue: Issue,
    /// Account that performed the change; `None` for anonymous/system changes.
    pub actor: Option<TrackerUser>,
    /// Subscription event keys this webhook satisfies.
    pub event_types: BTreeSet<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// The payload carried only an issue stub.
    pub partial_issue: bool,
    pub raw: Value,
}

impl ParsedWebhook {
    pub fn expand_issue(&self) -> bool {
        self.partial_issue || self.issue.fields.is_none()
    }

    pub fn has_relevant_changes(&self) -> bool {
        !self.event_types.is_empty()
    }

    pub fn comment(&self) -> Option<&Comment> {
        self.event.comment()
    }

    pub fn actor_label(&self) -> &str {
        self.actor.as_ref().map_or("Someone", TrackerUser::label)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWebhook {
    #[serde(default)]
    webhook_event: String,
    #[serde(default, rename = "issue_event_type_name")]
    issue_event_type_name: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    user: Option<TrackerUser>,
    #[serde(default)]
    issue: Option<Issue>,
    #[serde(default)]
    comment: Option<Comment>,
    #[serde(default)]
    changelog: Option<Changelog>,
}

/// Decodes a raw webhook body.
///
/// # Errors
///
/// * [`WebhookError::MalformedPayload`] for invalid JSON, a missing `webhookEvent`,
///   or an issue/comment event without its `issue` (or `comment`) object.
/// * [`WebhookError::UnsupportedEventKind`] for event kinds the bridge does not handle.
pub fn parse_webhook(raw: &[u8]) -> Result<ParsedWebhook, WebhookError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| WebhookError::MalformedPayload(format!("invalid JSON: {e}")))?;
    let payload: RawWebhook = serde_json::from_value(value.clone())
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let kind = payload.webhook_event.trim();
    if kind.is_empty() {
        return Err(WebhookError::MalformedPayload(
            "missing webhookEvent".to_string(),
        ));
    }

    let (event, partial_issue) = match kind {
        "jira:issue_created" => (WebhookEvent::IssueCreated, false),
        "jira:issue_deleted" => (WebhookEvent::IssueDeleted, false),
        "jira:issue_updated" => (
            classify_update(
                payload.issue_event_type_name.as_deref(),
                payload.comment.clone(),
                payload.changelog.clone(),
            )?,
            false,
        ),
        "comment_created" => (
            WebhookEvent::CommentCreated {
                comment: require_comment(payload.comment.clone())?,
            },
            true,
        ),
        "comment_updated" => (
            WebhookEvent::CommentUpdated {
                comment: require_comment(payload.comment.clone())?,
            },
            true,
        ),
        "comment_deleted" => (
            WebhookEvent::CommentDeleted {
                comment: require_comment(payload.comment.clone())?,
            },
            true,
        ),
        other => return Err(WebhookError::UnsupportedEventKind(other.to_string())),
    };

    let issue = payload.issue.ok_or_else(|| {
        WebhookError::MalformedPayload(format!("{kind} payload has no issue"))
    })?;

    let actor = match event.comment() {
        Some(comment) => comment
            .update_author
            .clone()
            .or_else(|| comment.author.clone())
            .or(payload.user),
        None => payload.user,
    };

    let event_types = event_types(&event, &issue);
    let timestamp = payload
        .timestamp
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    Ok(ParsedWebhook {
        event,
        issue,
        actor,
        event_types,
        timestamp,
        partial_issue,
        raw: value,
    })
}

fn require_comment(comment: Option<Comment>) -> Result<Comment, WebhookError> {
    comment.ok_or_else(|| WebhookError::MalformedPayload("comment event has no comment".to_string()))
}

fn classify_update(
    issue_event_type_name: Option<&str>,
    comment: Option<Comment>,
    changelog: Option<Changelog>,
) -> Result<WebhookEvent, WebhookError> {
    let event = match issue_event_type_name {
        Some("issue_commented") => WebhookEvent::CommentCreated {
            comment: require_comment(comment)?,
        },
        Some("issue_comment_edited") => WebhookEvent::CommentUpdated {
            comment: require_comment(comment)?,
        },
        Some("issue_comment_deleted") => WebhookEvent::CommentDeleted {
            comment: require_comment(comment)?,
        },
        _ => WebhookEvent::IssueUpdated {
            changes: changelog.map(|c| c.items).unwrap_or_default(),
        },
    };
    Ok(event)
}

fn event_types(event: &WebhookEvent, issue: &Issue) -> BTreeSet<String> {
    let mut types = BTreeSet::new();
    match event {
        WebhookEvent::IssueCreated => {
            types.insert(EVENT_CREATED.to_string());
        }
        WebhookEvent::IssueDeleted => {
            types.insert(EVENT_DELETED.to_string());
            if !issue.is_resolved() {
                types.insert(EVENT_DELETED_UNRESOLVED.to_string());
            }
        }
        WebhookEvent::CommentCreated { .. } => {
            types.insert(EVENT_CREATED_COMMENT.to_string());
        }
        WebhookEvent::CommentUpdated { .. } => {
            types.insert(EVENT_UPDATED_COMMENT.to_string());
        }
        WebhookEvent::CommentDeleted { .. } => {
            types.insert(EVENT_DELETED_COMMENT.to_string());
        }
        WebhookEvent::IssueUpdated { changes } => {
            types.extend(changes.iter().filter_map(change_event_type));
        }
    }
    types
}

/// Maps a changelog item to its `event_updated_*` key.
fn change_event_type(item: &ChangelogItem) -> Option<String> {
    if item.field_type.eq_ignore_ascii_case("custom") {
        return item
            .field_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("{EVENT_UPDATED_PREFIX}{id}"));
    }

    let suffix = match item.field.to_ascii_lowercase().as_str() {
        "resolution" => {
            let was_set = item.from.as_deref().is_some_and(|v| !v.is_empty());
            let is_set = item.to.as_deref().is_some_and(|v| !v.is_empty());
            return match (was_set, is_set) {
                (false, true) => Some(EVENT_UPDATED_RESOLVED.to_string()),
                (true, false) => Some(EVENT_UPDATED_REOPENED.to_string()),
                _ => None,
            };
        }
        "assignee" => "assignee",
        "status" => "status",
        "summary" => "summary",
        "description" => "description",
        "labels" => "labels",
        "priority" => "priority",
        "attachment" => "attachment",
        "sprint" => "sprint",
        "rank" => "rank",
        "fix version" => "fix_version",
        "version" => "affects_version",
        "component" => "components",
        "issuetype" => "issue_type",
        _ => return None,
    };
    Some(format!("{EVENT_UPDATED_PREFIX}{suffix}"))
}
