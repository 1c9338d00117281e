//! # Bot API Handlers
//!
//! Routes for allowlisted bots acting on behalf of another chat user. The
//! caller's own `Mattermost-User-Id` must be listed in `backdoor_bots`.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde_json::Value as JsonValue;

use crate::auth::{AllowedBot, MattermostUserHeader};
use crate::error::ApiError;
use crate::models::Issue;
use crate::models::issue::{Project, Worklog};
use crate::server::AppState;
use crate::services::WorklogRequest;
use crate::services::backdoor::{ActingUserIssueQuery, ActingUserProjectQuery, ActingUserQuery};

const OK: [&str; 1] = ["OK"];

/// Check that a user has a working connection
#[utoipa::path(
    get,
    path = "/api/v2/backdoor/check-auth",
    params(MattermostUserHeader, ActingUserQuery),
    responses(
        (status = 200, description = "User is connected", body = [String]),
        (status = 401, description = "Caller is not an allowed bot", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "bots"
)]
pub async fn check_auth(
    State(state): State<AppState>,
    _bot: AllowedBot,
    Query(query): Query<ActingUserQuery>,
) -> Result<Json<[&'static str; 1]>, ApiError> {
    state
        .backdoor
        .check_auth(query.instance_id.as_deref(), &query.user_id)
        .await?;
    Ok(Json(OK))
}

/// Fetch an issue as the acting user
#[utoipa::path(
    get,
    path = "/api/v2/backdoor/issue",
    params(MattermostUserHeader, ActingUserIssueQuery),
    responses(
        (status = 200, description = "Issue", body = JsonValue),
        (status = 401, description = "Caller is not an allowed bot", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "bots"
)]
pub async fn get_issue(
    State(state): State<AppState>,
    _bot: AllowedBot,
    Query(query): Query<ActingUserIssueQuery>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .backdoor
        .get_issue(query.instance_id.as_deref(), &query.user_id, &query.issue_key)
        .await?;
    Ok(Json(issue))
}

/// Fetch a project as the acting user
#[utoipa::path(
    get,
    path = "/api/v2/backdoor/project",
    params(MattermostUserHeader, ActingUserProjectQuery),
    responses(
        (status = 200, description = "Project", body = JsonValue),
        (status = 401, description = "Caller is not an allowed bot", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "bots"
)]
pub async fn get_project(
    State(state): State<AppState>,
    _bot: AllowedBot,
    Query(query): Query<ActingUserProjectQuery>,
) -> Result<Json<Project>, ApiError> {
    let project = state
        .backdoor
        .get_project(query.instance_id.as_deref(), &query.user_id, &query.project_key)
        .await?;
    Ok(Json(project))
}

/// Check that the acting user may log work on an issue
#[utoipa::path(
    get,
    path = "/api/v2/backdoor/worklog-permission",
    params(MattermostUserHeader, ActingUserIssueQuery),
    responses(
        (status = 200, description = "Work may be logged", body = [String]),
        (status = 401, description = "Caller is not an allowed bot", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "bots"
)]
pub async fn check_worklog_permission(
    State(state): State<AppState>,
    _bot: AllowedBot,
    Query(query): Query<ActingUserIssueQuery>,
) -> Result<Json<[&'static str; 1]>, ApiError> {
    state
        .backdoor
        .check_worklog_permission(query.instance_id.as_deref(), &query.user_id, &query.issue_key)
        .await?;
    Ok(Json(OK))
}

/// Log work on an issue as the acting user
#[utoipa::path(
    post,
    path = "/api/v2/backdoor/worklog",
    params(MattermostUserHeader),
    request_body = WorklogRequest,
    responses(
        (status = 200, description = "Created worklog", body = JsonValue),
        (status = 400, description = "No time given", body = ApiError),
        (status = 401, description = "Caller is not an allowed bot", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "bots"
)]
pub async fn add_worklog(
    State(state): State<AppState>,
    _bot: AllowedBot,
    Json(request): Json<WorklogRequest>,
) -> Result<Json<Worklog>, ApiError> {
    let worklog = state.backdoor.add_worklog(&request).await?;
    Ok(Json(worklog))
}
