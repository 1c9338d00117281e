//! # Webhook Handlers
//!
//! Inbound tracker webhooks are verified, size-checked and queued here. The
//! handler answers 202 as soon as the payload is queued; processing happens on
//! the worker pool.

use std::error::Error as _;

use axum::{
    extract::{Path, Query, Request, State},
    http::{StatusCode, header::CONTENT_LENGTH},
    response::Json,
};
use http_body_util::LengthLimitError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::models::InstanceId;
use crate::server::AppState;
use crate::webhook::EnqueueError;
use crate::webhook_verification::verify_webhook;

/// Seconds a sender should wait before retrying when the queue is full
pub const QUEUE_FULL_RETRY_AFTER_SECS: u64 = 5;

/// Query parameters accepted on webhook URLs
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct WebhookQuery {
    /// Shared webhook secret
    #[serde(default)]
    pub secret: Option<String>,
    /// Instance id, for deployments with several instances and no id in the path
    #[serde(default)]
    pub instance: Option<String>,
}

/// Path parameter carrying the URL-safe encoded instance id
#[derive(Debug, Deserialize, IntoParams)]
pub struct InstancePath {
    /// Base64 (URL-safe, unpadded) encoding of the instance id
    pub encoded_id: String,
}

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    /// Acceptance status
    pub status: String,
}

/// Receive a tracker webhook
#[utoipa::path(
    post,
    path = "/webhook",
    params(
        WebhookQuery,
        ("X-Hub-Signature" = Option<String>, Header, description = "HMAC-SHA256 of the body (sha256=<hex>), alternative to the secret query parameter"),
    ),
    request_body(content = JsonValue, description = "Tracker webhook payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Webhook queued", body = WebhookAcceptResponse),
        (status = 400, description = "Empty, unreadable body or invalid instance", body = ApiError),
        (status = 401, description = "Missing secret or signature", body = ApiError),
        (status = 403, description = "Secret mismatch", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError),
        (status = 413, description = "Body exceeds the configured limit", body = ApiError),
        (status = 503, description = "Queue full, retry later", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    request: Request,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    let instance_id = query.instance.clone().filter(|id| !id.trim().is_empty());
    accept_webhook(state, instance_id.map(InstanceId::from), query, request).await
}

/// Receive a tracker webhook for the instance encoded in the path
#[utoipa::path(
    post,
    path = "/instance/{encoded_id}/webhook",
    params(
        InstancePath,
        WebhookQuery,
        ("X-Hub-Signature" = Option<String>, Header, description = "HMAC-SHA256 of the body (sha256=<hex>)"),
    ),
    request_body(content = JsonValue, description = "Tracker webhook payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Webhook queued", body = WebhookAcceptResponse),
        (status = 400, description = "Empty, unreadable body or undecodable instance id", body = ApiError),
        (status = 401, description = "Missing secret or signature", body = ApiError),
        (status = 403, description = "Secret mismatch", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError),
        (status = 413, description = "Body exceeds the configured limit", body = ApiError),
        (status = 503, description = "Queue full, retry later", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn ingest_instance_webhook(
    State(state): State<AppState>,
    Path(path): Path<InstancePath>,
    Query(query): Query<WebhookQuery>,
    request: Request,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    let instance_id = InstanceId::decode(&path.encoded_id).ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Invalid instance id in path",
        )
    })?;
    accept_webhook(state, Some(instance_id), query, request).await
}

async fn accept_webhook(
    state: AppState,
    instance_id: Option<InstanceId>,
    query: WebhookQuery,
    request: Request,
) -> Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError> {
    let limit = state.config.webhook_max_body_bytes();
    let headers = request.headers().clone();

    let declared_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|length| length > limit) {
        return Err(payload_too_large(limit));
    }

    let body = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|err| {
            if exceeded_limit(&err) {
                warn!(limit, "Webhook body exceeds the limit");
                payload_too_large(limit)
            } else {
                warn!(error = %err, "Failed to read webhook body");
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_FAILED",
                    "Webhook body could not be read",
                )
            }
        })?;
    if body.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Webhook body is empty",
        ));
    }

    match state.config.webhook_secret.as_deref() {
        Some(secret) => {
            verify_webhook(query.secret.as_deref(), &headers, &body, secret).map_err(|err| {
                warn!(error = %err, "Rejected webhook");
                let code = if err.status_code() == StatusCode::FORBIDDEN {
                    "FORBIDDEN"
                } else {
                    "UNAUTHORIZED"
                };
                ApiError::new(err.status_code(), code, err.to_string())
            })?;
        }
        None => debug!("Webhook secret not configured; accepting unverified webhook"),
    }

    let instance = state
        .issues
        .context()
        .resolve_instance(instance_id.as_ref().map(InstanceId::as_str))
        .await?;

    let size = body.len();
    state
        .webhooks
        .enqueue(instance.id.clone(), body.to_vec())
        .map_err(|err| match err {
            EnqueueError::QueueFull => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                "Webhook queue is full, retry later",
            )
            .with_retry_after(QUEUE_FULL_RETRY_AFTER_SECS),
            EnqueueError::Closed => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Webhook processing is shutting down",
            ),
        })?;

    info!(
        instance_id = %instance.id,
        body_size = size,
        queue_remaining = state.webhooks.remaining_capacity(),
        "Webhook queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAcceptResponse {
            status: "accepted".to_string(),
        }),
    ))
}

fn exceeded_limit(err: &axum::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return true;
        }
        source = cause.source();
    }
    false
}

fn payload_too_large(limit: usize) -> ApiError {
    ApiError::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        "PAYLOAD_TOO_LARGE",
        format!("Webhook body exceeds {limit} bytes"),
    )
}
