//! # Channel Subscription Handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{MattermostUserHeader, MattermostUserId};
use crate::error::ApiError;
use crate::handlers::types::InstanceQuery;
use crate::models::{ChannelSubscription, InstanceId};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionListResponse {
    pub instance_id: InstanceId,
    pub channel_id: String,
    pub subscriptions: Vec<ChannelSubscription>,
}

/// Channel id for listing, subscription id for deletion
#[derive(Debug, Deserialize)]
pub struct SubscriptionPath {
    pub id: String,
}

/// List a channel's subscriptions
#[utoipa::path(
    get,
    path = "/api/v2/subscriptions/channel/{id}",
    params(
        MattermostUserHeader,
        InstanceQuery,
        ("id" = String, Path, description = "Chat channel id"),
    ),
    responses(
        (status = 200, description = "Subscriptions in creation order", body = SubscriptionListResponse),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "subscriptions"
)]
pub async fn list_channel_subscriptions(
    State(state): State<AppState>,
    _user: MattermostUserId,
    Path(path): Path<SubscriptionPath>,
    Query(query): Query<InstanceQuery>,
) -> Result<Json<SubscriptionListResponse>, ApiError> {
    let (instance_id, subscriptions) = state
        .subscriptions
        .list_for_channel(query.instance_id.as_deref(), &path.id)
        .await?;
    Ok(Json(SubscriptionListResponse {
        instance_id,
        channel_id: path.id,
        subscriptions,
    }))
}

/// Create a channel subscription
#[utoipa::path(
    post,
    path = "/api/v2/subscriptions/channel",
    params(MattermostUserHeader),
    request_body = ChannelSubscription,
    responses(
        (status = 201, description = "Subscription created", body = ChannelSubscription),
        (status = 400, description = "Malformed filters", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError),
        (status = 409, description = "Name already used in the channel", body = ApiError)
    ),
    tag = "subscriptions"
)]
pub async fn create_channel_subscription(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(subscription): Json<ChannelSubscription>,
) -> Result<(StatusCode, Json<ChannelSubscription>), ApiError> {
    let created = state
        .subscriptions
        .create(user.as_str(), subscription)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Edit a channel subscription
#[utoipa::path(
    put,
    path = "/api/v2/subscriptions/channel",
    params(MattermostUserHeader),
    request_body = ChannelSubscription,
    responses(
        (status = 200, description = "Subscription updated", body = ChannelSubscription),
        (status = 400, description = "Malformed filters", body = ApiError),
        (status = 404, description = "Unknown subscription", body = ApiError)
    ),
    tag = "subscriptions"
)]
pub async fn edit_channel_subscription(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(subscription): Json<ChannelSubscription>,
) -> Result<Json<ChannelSubscription>, ApiError> {
    let edited = state.subscriptions.edit(user.as_str(), subscription).await?;
    Ok(Json(edited))
}

/// Delete a channel subscription
#[utoipa::path(
    delete,
    path = "/api/v2/subscriptions/channel/{id}",
    params(
        MattermostUserHeader,
        InstanceQuery,
        ("id" = String, Path, description = "Subscription id"),
    ),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Unknown subscription", body = ApiError)
    ),
    tag = "subscriptions"
)]
pub async fn delete_channel_subscription(
    State(state): State<AppState>,
    _user: MattermostUserId,
    Path(path): Path<SubscriptionPath>,
    Query(query): Query<InstanceQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .subscriptions
        .delete(query.instance_id.as_deref(), &path.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
