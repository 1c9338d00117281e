//! # Search and Metadata Handlers
//!
//! Lookups behind the chat client's issue pickers and create form.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use utoipa::IntoParams;

use crate::auth::{MattermostUserHeader, MattermostUserId};
use crate::error::ApiError;
use crate::handlers::types::InstanceQuery;
use crate::models::Issue;
use crate::server::AppState;
use crate::services::{ProjectMetadata, SearchQuery};

#[derive(Debug, Deserialize, IntoParams)]
pub struct CreateMetadataQuery {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Comma-separated project keys
    #[serde(rename = "project-keys", default)]
    pub project_keys: String,
}

/// Search issues by text, JQL or exact key
#[utoipa::path(
    get,
    path = "/api/v2/get-search-issues",
    params(MattermostUserHeader, SearchQuery),
    responses(
        (status = 200, description = "Matching issues", body = JsonValue),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError),
        (status = 502, description = "Tracker request failed", body = ApiError)
    ),
    tag = "search"
)]
pub async fn search_issues(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let issues = state.search.search_issues(user.as_str(), &query).await?;
    Ok(Json(issues))
}

/// Create-screen fields for the given projects
#[utoipa::path(
    get,
    path = "/api/v2/get-create-issue-metadata-for-project",
    params(MattermostUserHeader, CreateMetadataQuery),
    responses(
        (status = 200, description = "Jira create metadata, or an error object when no project accepts issues", body = JsonValue),
        (status = 400, description = "Missing project-keys", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "search"
)]
pub async fn get_create_issue_metadata(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<CreateMetadataQuery>,
) -> Result<Json<JsonValue>, ApiError> {
    let meta = state
        .search
        .create_issue_metadata(query.instance_id.as_deref(), user.as_str(), &query.project_keys)
        .await?;
    Ok(Json(meta))
}

/// Projects and issue types for the create form
#[utoipa::path(
    get,
    path = "/api/v2/get-jira-project-metadata",
    params(MattermostUserHeader, InstanceQuery),
    responses(
        (status = 200, description = "Project and issue type options", body = ProjectMetadata),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "search"
)]
pub async fn get_project_metadata(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<ProjectMetadata>, ApiError> {
    let metadata = state
        .search
        .project_metadata(query.instance_id.as_deref(), user.as_str())
        .await?;
    Ok(Json(metadata))
}
