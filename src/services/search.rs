//! Read-only lookups backing the issue pickers and the create form.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use super::{IssueActionError, ServiceContext};
use crate::models::Issue;

const DEFAULT_SEARCH_FIELDS: &str = "key,summary";
const DEFAULT_SEARCH_LIMIT: u32 = 50;
pub const NO_CREATE_PERMISSION_MESSAGE: &str =
    "You do not have permission to create issues in that project. Please contact your Jira admin.";
pub const NO_PROJECTS_MESSAGE: &str =
    "You do not have permission to create issues in any projects. Please contact your Jira admin.";

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[[:alnum:]]+-[[:digit:]]+$").expect("Invalid issue key regex"));

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SearchQuery {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Free text, or an exact issue key.
    #[serde(default)]
    pub q: String,
    /// JQL to run instead of the free-text search.
    #[serde(default)]
    pub jql: String,
    /// Comma-separated issue fields to return (default: key,summary)
    #[serde(default)]
    pub fields: String,
    #[serde(default)]
    pub limit: String,
}

/// Option shape the chat client's select inputs consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ProjectMetadata {
    pub projects: Vec<SelectOption>,
    /// Non-subtask issue types per project key.
    pub issues_per_project: BTreeMap<String, Vec<SelectOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SearchService {
    ctx: ServiceContext,
}

impl SearchService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Issues matching `query.q` or `query.jql`. A `q` shaped like an issue key
    /// is looked up directly; an unreadable key yields no results.
    pub async fn search_issues(
        &self,
        mattermost_user_id: &str,
        query: &SearchQuery,
    ) -> Result<Vec<Issue>, IssueActionError> {
        let user = self
            .ctx
            .user_client(query.instance_id.as_deref(), mattermost_user_id)
            .await?;
        let q = query.q.trim();

        if ISSUE_KEY.is_match(q) {
            return match user.client.get_issue(q).await {
                Ok(issue) => Ok(vec![issue]),
                Err(err) => {
                    debug!(error = %err, issue_key = q, "Exact issue lookup found nothing");
                    Ok(Vec::new())
                }
            };
        }

        let fields = if query.fields.trim().is_empty() {
            DEFAULT_SEARCH_FIELDS
        } else {
            query.fields.trim()
        };
        let fields: Vec<String> = fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        let jql = if query.jql.trim().is_empty() {
            text_search_jql(q)
        } else {
            query.jql.clone()
        };
        let limit = query.limit.trim().parse().unwrap_or(DEFAULT_SEARCH_LIMIT);

        Ok(user.client.search_issues(&jql, &fields, limit).await?)
    }

    /// Create-screen metadata for the comma-separated `project_keys`, or an
    /// `{"error": ..}` object when none of them accepts new issues from the user.
    pub async fn create_issue_metadata(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        project_keys: &str,
    ) -> Result<Value, IssueActionError> {
        let project_keys = project_keys.trim();
        if project_keys.is_empty() {
            return Err(IssueActionError::Validation(
                "project-keys query param is required".to_string(),
            ));
        }
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let meta = user.client.get_create_meta(project_keys).await?;

        let has_projects = meta
            .get("projects")
            .and_then(Value::as_array)
            .is_some_and(|projects| !projects.is_empty());
        if !has_projects {
            return Ok(serde_json::json!({ "error": NO_CREATE_PERMISSION_MESSAGE }));
        }
        Ok(meta)
    }

    /// Projects and their issue types as select options, with the project the
    /// user created an issue in last.
    pub async fn project_metadata(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
    ) -> Result<ProjectMetadata, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let projects = user.client.list_projects().await?;

        let mut metadata = ProjectMetadata {
            default_project_key: user.connection.default_project_key.clone(),
            ..Default::default()
        };
        if projects.is_empty() {
            metadata.error = Some(NO_PROJECTS_MESSAGE.to_string());
            return Ok(metadata);
        }

        for project in projects {
            let issue_types = project
                .issue_types
                .iter()
                .filter(|t| !t.subtask)
                .map(|t| SelectOption {
                    value: t.id.clone(),
                    label: t.name.clone(),
                })
                .collect();
            metadata.issues_per_project.insert(project.key.clone(), issue_types);
            metadata.projects.push(SelectOption {
                value: project.key,
                label: project.name,
            });
        }
        Ok(metadata)
    }
}

/// Full-text JQL matching `q` as a word or a prefix.
fn text_search_jql(q: &str) -> String {
    let escaped = q.replace('"', "\\\"");
    format!(r#"text ~ "{escaped}" OR text ~ "{escaped}*""#)
}
