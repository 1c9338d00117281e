//! # Tracker Client
//!
//! Narrow interface over the issue tracker's REST API. The webhook pipeline and
//! the issue services only talk to the tracker through [`TrackerClient`], and
//! obtain clients through a [`TrackerClientFactory`] so tests can substitute
//! fakes.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::issue::{Attachment, CreatedIssue, Project, Resolution, Worklog};
use crate::models::{Comment, Connection, Instance, Issue, TrackerUser, Transition};

pub mod jira;

pub use jira::{JiraClient, JiraClientFactory};

/// Errors returned by tracker clients, classified by upstream status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker rejected credentials")]
    Unauthorized,
    #[error("tracker denied access: {0}")]
    Forbidden(String),
    #[error("tracker resource not found: {0}")]
    NotFound(String),
    #[error("tracker rate limited")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("tracker returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("tracker unreachable: {0}")]
    Transport(String),
    #[error("unexpected tracker response: {0}")]
    Decode(String),
    #[error("no tracker credentials available: {0}")]
    MissingCredentials(String),
}

impl TrackerError {
    /// Classify a non-success response.
    pub fn from_status(status: StatusCode, retry_after: Option<u64>, body: String) -> Self {
        let snippet = truncate(&body, 200);
        match status {
            StatusCode::UNAUTHORIZED => TrackerError::Unauthorized,
            StatusCode::FORBIDDEN => TrackerError::Forbidden(snippet),
            StatusCode::NOT_FOUND => TrackerError::NotFound(snippet),
            StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited {
                retry_after_secs: retry_after,
            },
            other => TrackerError::Http {
                status: other.as_u16(),
                body: snippet,
            },
        }
    }

    /// HTTP status the tracker answered with, when the error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TrackerError::Unauthorized => Some(401),
            TrackerError::Forbidden(_) => Some(403),
            TrackerError::NotFound(_) => Some(404),
            TrackerError::RateLimited { .. } => Some(429),
            TrackerError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The caller cannot see the resource (missing, hidden or unauthorized).
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            TrackerError::Unauthorized | TrackerError::Forbidden(_) | TrackerError::NotFound(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::RateLimited { .. } | TrackerError::Transport(_) => true,
            TrackerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TrackerError::Decode(err.to_string())
        } else {
            TrackerError::Transport(err.to_string())
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

/// Operations the bridge performs against a tracker on behalf of one identity.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn get_issue(&self, issue_key: &str) -> Result<Issue, TrackerError>;

    async fn get_transitions(&self, issue_key: &str) -> Result<Vec<Transition>, TrackerError>;

    /// Applies a transition, optionally setting the resolution by name.
    async fn do_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
        resolution: Option<&str>,
    ) -> Result<(), TrackerError>;

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<Comment, TrackerError>;

    async fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, TrackerError>;

    /// Sets the assignee; `None` unassigns.
    async fn update_assignee(
        &self,
        issue_key: &str,
        assignee: Option<&TrackerUser>,
    ) -> Result<(), TrackerError>;

    async fn search_users_assignable_to_issue(
        &self,
        issue_key: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<TrackerUser>, TrackerError>;

    /// Projects visible to the caller, with their issue types.
    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError>;

    async fn get_project(&self, project_key: &str) -> Result<Project, TrackerError>;

    async fn get_watchers(&self, issue_key: &str) -> Result<Vec<TrackerUser>, TrackerError>;

    /// Creates an issue from a Jira `fields` object.
    async fn create_issue(&self, fields: &Value) -> Result<CreatedIssue, TrackerError>;

    async fn search_issues(
        &self,
        jql: &str,
        fields: &[String],
        max_results: u32,
    ) -> Result<Vec<Issue>, TrackerError>;

    /// Create-screen metadata for the given comma-separated project keys,
    /// expanded down to issue type fields.
    async fn get_create_meta(&self, project_keys: &str) -> Result<Value, TrackerError>;

    /// Fields the caller may edit on the issue, keyed by field id.
    async fn get_edit_meta(&self, issue_key: &str) -> Result<Map<String, Value>, TrackerError>;

    async fn has_worklog_permission(&self, issue_key: &str) -> Result<bool, TrackerError>;

    async fn add_worklog(
        &self,
        issue_key: &str,
        time_spent_seconds: u64,
        comment: &str,
    ) -> Result<Worklog, TrackerError>;

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Vec<Attachment>, TrackerError>;

    async fn get_resolutions(&self) -> Result<Vec<Resolution>, TrackerError>;

    /// Looks up an account by account id (cloud) or username (server).
    async fn get_user(&self, account: &str) -> Result<TrackerUser, TrackerError>;

    /// The account the client authenticates as.
    async fn get_myself(&self) -> Result<TrackerUser, TrackerError>;
}

/// Produces clients for an instance: the user's own client when a connection is
/// given, the instance bot client otherwise.
pub trait TrackerClientFactory: Send + Sync {
    fn client_for(
        &self,
        instance: &Instance,
        connection: Option<&Connection>,
    ) -> Result<Arc<dyn TrackerClient>, TrackerError>;
}
