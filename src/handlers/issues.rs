//! # Issue Action Handlers
//!
//! Actions a chat user performs on tracker issues. Every route acts with the
//! user's own tracker connection.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;
use utoipa::{IntoParams, ToSchema};

use crate::auth::{MattermostUserHeader, MattermostUserId};
use crate::error::ApiError;
use crate::handlers::types::ActionResponse;
use crate::models::{Issue, TrackerUser, Transition};
use crate::server::AppState;
use crate::services::{
    AttachCommentRequest, CreateIssueRequest, IssueActionError, TransitionRequest,
    UpdateIssueRequest,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub issue_key: String,
    /// Assignee search text; empty or absent unassigns the issue.
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub root_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ShareIssueRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub issue_key: String,
    pub channel_id: String,
    /// Ephemeral preview post to replace
    pub post_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct IssueKeyQuery {
    pub issue_key: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct AssigneeQuery {
    pub issue_key: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Text matched against user names
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachCommentResponse {
    pub issue_key: String,
    pub comment_id: String,
    /// Confirmation post created in the thread
    pub post_id: String,
}

/// Sends the confirmation for a finished action into the originating channel.
/// Failing to confirm does not fail the action.
async fn confirm(
    state: &AppState,
    instance_id: Option<&str>,
    user: &MattermostUserId,
    channel_id: Option<&str>,
    root_id: Option<&str>,
    message: &str,
) {
    let Some(channel_id) = channel_id.filter(|c| !c.is_empty()) else {
        return;
    };
    let result = async {
        let (_, connection) = state.issues.connection_for(instance_id, user.as_str()).await?;
        state
            .issues
            .create_notification_post(
                &connection,
                user.as_str(),
                channel_id,
                root_id.unwrap_or_default(),
                message,
            )
            .await
    }
    .await;
    if let Err(err) = result {
        warn!(error = %err, channel_id, "Failed to confirm action in channel");
    }
}

async fn report(
    state: &AppState,
    user: &MattermostUserId,
    channel_id: Option<&str>,
    message: &str,
    err: IssueActionError,
) -> ApiError {
    if let Some(channel_id) = channel_id {
        state.issues.report_failure(user.as_str(), channel_id, message).await;
    }
    err.into()
}

/// Transition an issue to a new state
#[utoipa::path(
    post,
    path = "/api/v2/transition",
    params(MattermostUserHeader),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Issue transitioned", body = ActionResponse),
        (status = 400, description = "No or several matching states or resolutions", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError),
        (status = 502, description = "Tracker request failed", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn transition_issue(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    match state.issues.transition_issue(user.as_str(), &request).await {
        Ok(message) => {
            confirm(
                &state,
                request.instance_id.as_deref(),
                &user,
                request.channel_id.as_deref(),
                request.root_id.as_deref(),
                &message,
            )
            .await;
            Ok(Json(ActionResponse::new(message)))
        }
        Err(err) => Err(report(
            &state,
            &user,
            request.channel_id.as_deref(),
            "Failed to transition this issue.",
            err,
        )
        .await),
    }
}

/// Assign or unassign an issue
#[utoipa::path(
    post,
    path = "/api/v2/assign",
    params(MattermostUserHeader),
    request_body = AssignRequest,
    responses(
        (status = 200, description = "Assignee updated", body = ActionResponse),
        (status = 400, description = "Search too short, no match or several matches", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError),
        (status = 502, description = "Tracker request failed", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn assign_issue(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<AssignRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let instance_id = request.instance_id.as_deref();
    let result = match request.assignee.as_deref().map(str::trim) {
        Some(search) if !search.is_empty() => {
            state
                .issues
                .assign_issue(instance_id, user.as_str(), &request.issue_key, search)
                .await
        }
        _ => {
            state
                .issues
                .unassign_issue(instance_id, user.as_str(), &request.issue_key)
                .await
        }
    };

    match result {
        Ok(message) => {
            confirm(
                &state,
                instance_id,
                &user,
                request.channel_id.as_deref(),
                request.root_id.as_deref(),
                &message,
            )
            .await;
            Ok(Json(ActionResponse::new(message)))
        }
        Err(err) => Err(report(
            &state,
            &user,
            request.channel_id.as_deref(),
            "Failed to assign this issue.",
            err,
        )
        .await),
    }
}

/// Copy a chat post into an issue comment
#[utoipa::path(
    post,
    path = "/api/v2/attach-comment-to-issue",
    params(MattermostUserHeader),
    request_body = AttachCommentRequest,
    responses(
        (status = 200, description = "Comment created; files upload in the background", body = AttachCommentResponse),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted to comment", body = ApiError),
        (status = 404, description = "Post or issue not found", body = ApiError),
        (status = 502, description = "Upstream request failed", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn attach_comment_to_issue(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<AttachCommentRequest>,
) -> Result<Json<AttachCommentResponse>, ApiError> {
    let attached = state
        .issues
        .attach_comment_to_issue(user.as_str(), &request)
        .await?;

    Ok(Json(AttachCommentResponse {
        issue_key: request.issue_key.trim().to_uppercase(),
        comment_id: attached.comment.id,
        post_id: attached.reply.id,
    }))
}

/// Fetch an issue with the user's credentials
#[utoipa::path(
    get,
    path = "/api/v2/get-issue-by-key",
    params(MattermostUserHeader, IssueKeyQuery),
    responses(
        (status = 200, description = "Issue", body = JsonValue),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn get_issue_by_key(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<IssueKeyQuery>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state
        .issues
        .get_issue_by_key(query.instance_id.as_deref(), user.as_str(), &query.issue_key)
        .await?;
    Ok(Json(issue))
}

/// Post an issue card into a channel
#[utoipa::path(
    post,
    path = "/api/v2/share-issue-publicly",
    params(MattermostUserHeader),
    request_body = ShareIssueRequest,
    responses(
        (status = 200, description = "Issue shared", body = ActionResponse),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn share_issue_publicly(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<ShareIssueRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let post = state
        .issues
        .share_issue_publicly(
            request.instance_id.as_deref(),
            user.as_str(),
            &request.channel_id,
            &request.issue_key,
            &request.post_id,
        )
        .await?;
    Ok(Json(ActionResponse::new(format!(
        "Shared {} as post {}",
        request.issue_key, post.id
    ))))
}

/// Create an issue, optionally from a chat post
#[utoipa::path(
    post,
    path = "/api/v2/create-issue",
    params(MattermostUserHeader),
    request_body = CreateIssueRequest,
    responses(
        (status = 200, description = "Created issue as read back from Jira", body = JsonValue),
        (status = 400, description = "Missing project or fields Jira requires", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Post or project not found", body = ApiError),
        (status = 502, description = "Upstream request failed", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn create_issue(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<CreateIssueRequest>,
) -> Result<Json<Issue>, ApiError> {
    let created = state.issues.create_issue(user.as_str(), &request).await?;
    Ok(Json(created.issue))
}

/// Apply a transition and/or a new assignee
#[utoipa::path(
    post,
    path = "/api/v2/update-issue",
    params(MattermostUserHeader),
    request_body = UpdateIssueRequest,
    responses(
        (status = 200, description = "Updated issue", body = JsonValue),
        (status = 400, description = "Nothing to update or unknown assignee", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or not permitted", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn update_issue(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<UpdateIssueRequest>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.issues.update_issue(user.as_str(), &request).await?;
    Ok(Json(issue))
}

/// List the transitions the user may apply
#[utoipa::path(
    get,
    path = "/api/v2/issue-transitions",
    params(MattermostUserHeader, IssueKeyQuery),
    responses(
        (status = 200, description = "Available transitions", body = JsonValue),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected or has no transitions", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn get_issue_transitions(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<IssueKeyQuery>,
) -> Result<Json<Vec<Transition>>, ApiError> {
    let transitions = state
        .issues
        .get_issue_transitions(query.instance_id.as_deref(), user.as_str(), &query.issue_key)
        .await?;
    Ok(Json(transitions))
}

/// Search users the issue can be assigned to
#[utoipa::path(
    get,
    path = "/api/v2/issue-available-assignees",
    params(MattermostUserHeader, AssigneeQuery),
    responses(
        (status = 200, description = "Assignable users", body = JsonValue),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User may not change the assignee", body = ApiError),
        (status = 404, description = "Issue not found", body = ApiError)
    ),
    tag = "issues"
)]
pub async fn get_available_assignees(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<AssigneeQuery>,
) -> Result<Json<Vec<TrackerUser>>, ApiError> {
    let users = state
        .issues
        .get_available_assignees(
            query.instance_id.as_deref(),
            user.as_str(),
            &query.issue_key,
            &query.q,
        )
        .await?;
    Ok(Json(users))
}
