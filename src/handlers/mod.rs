//! # API Handlers
//!
//! HTTP endpoint handlers for the bridge: webhook intake, the user-facing
//! issue, search, settings, connection and subscription routes, and the bot API.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod backdoor;
pub mod connections;
pub mod issues;
pub mod search;
pub mod settings;
pub mod subscriptions;
pub mod types;
pub mod webhooks;

pub use types::{ActionResponse, InstanceQuery};

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[cfg(test)]
mod tests;
