//! # Error Handling
//!
//! Unified error handling for the bridge's HTTP API, rendering every failure
//! as a problem+json response carrying a trace id for log correlation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::chat::ChatError;
use crate::repositories::RepositoryError;
use crate::services::IssueActionError;
use crate::telemetry;
use crate::tracker::{TrackerError, truncate};

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active request context (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Upstream service error information
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamError {
    /// Upstream service ("jira" or "mattermost")
    pub upstream: String,
    /// HTTP status code from upstream, when it answered
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", error.to_string())
            }
            RepositoryError::Conflict { .. } => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", error.to_string())
            }
            RepositoryError::Unavailable(ref reason) => {
                tracing::error!(reason = %reason, "Store unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Store unavailable",
                )
            }
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(error: TrackerError) -> Self {
        let body = match &error {
            TrackerError::Forbidden(body)
            | TrackerError::NotFound(body)
            | TrackerError::Http { body, .. } => Some(body.clone()),
            _ => None,
        };
        let api_error = upstream_error("jira", error.status_code(), body);
        match error {
            TrackerError::RateLimited {
                retry_after_secs: Some(secs),
            } => api_error.with_retry_after(secs),
            _ => api_error,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::Http { status, message } => upstream_error("mattermost", Some(status), Some(message)),
            other => upstream_error("mattermost", None, Some(other.to_string())),
        }
    }
}

impl From<IssueActionError> for ApiError {
    fn from(error: IssueActionError) -> Self {
        match error {
            IssueActionError::NotConnected(_) => {
                Self::new(StatusCode::FORBIDDEN, "NOT_CONNECTED", error.to_string())
            }
            IssueActionError::InstanceNotFound(_) | IssueActionError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", error.to_string())
            }
            IssueActionError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
            }
            IssueActionError::Forbidden(message) => {
                Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
            }
            IssueActionError::Conflict(message) => {
                Self::new(StatusCode::CONFLICT, "CONFLICT", message)
            }
            IssueActionError::Tracker(err) => err.into(),
            IssueActionError::Chat(err) => err.into(),
            IssueActionError::Store(err) => err.into(),
        }
    }
}

/// Create an upstream error. Every upstream failure maps to 502 UPSTREAM_ERROR.
pub fn upstream_error(upstream: &str, status: Option<u16>, body: Option<String>) -> ApiError {
    let details = UpstreamError {
        upstream: upstream.to_string(),
        status,
        body_snippet: body.map(|b| truncate(&b, 200)),
    };

    let message = match status {
        Some(status) => format!("{upstream} returned error status {status}"),
        None => format!("{upstream} request failed"),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message).with_details(json!(details))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
