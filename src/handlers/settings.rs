//! User settings handler

use axum::{extract::State, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::{MattermostUserHeader, MattermostUserId};
use crate::error::ApiError;
use crate::handlers::types::ActionResponse;
use crate::server::AppState;
use crate::services::SettingKind;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SettingsRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// `notifications` or `displayHiddenMessages`
    pub setting: String,
    /// `on` or `off`
    pub value: String,
}

/// Update a notification setting
#[utoipa::path(
    post,
    path = "/api/v2/settings",
    params(MattermostUserHeader),
    request_body = SettingsRequest,
    responses(
        (status = 200, description = "Setting updated", body = ActionResponse),
        (status = 400, description = "Unknown setting or value", body = ApiError),
        (status = 401, description = "Missing user header", body = ApiError),
        (status = 403, description = "User not connected", body = ApiError)
    ),
    tag = "settings"
)]
pub async fn update_setting(
    State(state): State<AppState>,
    user: MattermostUserId,
    Json(request): Json<SettingsRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let kind: SettingKind = request.setting.parse()?;
    let message = state
        .settings
        .update_setting(
            request.instance_id.as_deref(),
            user.as_str(),
            kind,
            &request.value,
        )
        .await?;
    Ok(Json(ActionResponse::new(message)))
}
