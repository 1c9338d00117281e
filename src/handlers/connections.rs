//! # Connection Handlers
//!
//! Link and unlink the requesting chat user's tracker account.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{MattermostUserHeader, MattermostUserId};
use crate::error::ApiError;
use crate::handlers::types::{ActionResponse, InstanceQuery};
use crate::models::{Connection, InstanceId};
use crate::server::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConnectRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Personal access token of the tracker account
    pub access_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionResponse {
    pub instance_id: InstanceId,
    pub connection: Connection,
}

/// Connect the user's tracker account
#[utoipa::path(
    post,
    path = "/api/v2/connect",
    params(MattermostUserHeader),
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Account connected", body = ConnectionResponse),
        (status = 400, description = "Empty token", body = ApiError),
        (status = 403, description = "Token rejected by the tracker", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn connect(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let (instance, connection) = state
        .connections
        .connect(
            request.instance_id.as_deref(),
            user.as_str(),
            &request.access_token,
        )
        .await?;
    Ok(Json(ConnectionResponse {
        instance_id: instance.id,
        connection,
    }))
}

/// Show the user's connection
#[utoipa::path(
    get,
    path = "/api/v2/connection",
    params(MattermostUserHeader, InstanceQuery),
    responses(
        (status = 200, description = "Current connection", body = ConnectionResponse),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<ConnectionResponse>, ApiError> {
    let (instance, connection) = state
        .connections
        .get_connection(query.instance_id.as_deref(), user.as_str())
        .await?;
    Ok(Json(ConnectionResponse {
        instance_id: instance.id,
        connection,
    }))
}

/// Disconnect the user's tracker account
#[utoipa::path(
    delete,
    path = "/api/v2/connect",
    params(MattermostUserHeader, InstanceQuery),
    responses(
        (status = 200, description = "Account disconnected", body = ActionResponse),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    user: MattermostUserId,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<ActionResponse>, ApiError> {
    let connection = state
        .connections
        .disconnect(query.instance_id.as_deref(), user.as_str())
        .await?;
    Ok(Json(ActionResponse::new(format!(
        "You have successfully disconnected your Jira account (**{}**).",
        connection.display_name
    ))))
}
