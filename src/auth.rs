//! # Request Identity
//!
//! User-initiated API routes act on behalf of the chat user named in the
//! `Mattermost-User-Id` header, which the chat server sets on requests it
//! forwards to the bridge. The bot API additionally requires that user to be
//! one of the configured bots.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::error::{ApiError, unauthorized, validation_error};
use crate::server::AppState;

pub const MATTERMOST_USER_ID_HEADER: &str = "Mattermost-User-Id";

/// Chat user the request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MattermostUserId(pub String);

impl MattermostUserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// OpenAPI header parameter for Mattermost-User-Id
#[derive(Debug, Serialize, Deserialize, IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Header)]
pub struct MattermostUserHeader {
    /// Chat user id the request is performed for
    #[serde(rename = "Mattermost-User-Id")]
    #[param(rename = "Mattermost-User-Id", value_type = String)]
    pub user_id: String,
}

impl<S> FromRequestParts<S> for MattermostUserId
where
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(MATTERMOST_USER_ID_HEADER)
            .ok_or_else(|| unauthorized(Some("Not authorized")))?
            .to_str()
            .map_err(|_| {
                validation_error(
                    "Invalid user header",
                    serde_json::json!({ MATTERMOST_USER_ID_HEADER: "Header must be visible ASCII" }),
                )
            })?
            .trim();

        if value.is_empty() {
            return Err(unauthorized(Some("Not authorized")));
        }
        Ok(MattermostUserId(value.to_string()))
    }
}

/// A caller listed in `backdoor_bots`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedBot(pub String);

impl FromRequestParts<AppState> for AllowedBot {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = MattermostUserId::from_request_parts(parts, state).await?;
        if state.config.backdoor_bots.iter().any(|bot| bot == caller.as_str()) {
            Ok(AllowedBot(caller.0))
        } else {
            Err(unauthorized(Some("Not authorized")))
        }
    }
}
