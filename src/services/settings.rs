//! Per-user notification preferences.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use super::{IssueActionError, ServiceContext};

pub const INVALID_VALUE_MESSAGE: &str = "Invalid value. Accepted values are: `on` or `off`.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Notifications,
    DisplayHiddenMessages,
}

impl SettingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKind::Notifications => "notifications",
            SettingKind::DisplayHiddenMessages => "displayHiddenMessages",
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKind {
    type Err = IssueActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "notifications" => Ok(SettingKind::Notifications),
            "displayHiddenMessages" | "display_hidden_messages" => {
                Ok(SettingKind::DisplayHiddenMessages)
            }
            other => Err(IssueActionError::Validation(format!(
                "Unknown setting `{other}`. Accepted settings are: `notifications` or `displayHiddenMessages`."
            ))),
        }
    }
}

/// `on` / `off`, case-insensitive.
pub fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub struct SettingsService {
    ctx: ServiceContext,
}

impl SettingsService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Updates one setting on the user's connection and returns the confirmation.
    pub async fn update_setting(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        kind: SettingKind,
        value: &str,
    ) -> Result<String, IssueActionError> {
        let enabled = parse_toggle(value)
            .ok_or_else(|| IssueActionError::Validation(INVALID_VALUE_MESSAGE.to_string()))?;

        let instance = self.ctx.resolve_instance(instance_id).await?;
        let mut connection = self.ctx.load_connection(&instance, mattermost_user_id).await?;
        match kind {
            SettingKind::Notifications => connection.settings.notifications = enabled,
            SettingKind::DisplayHiddenMessages => {
                connection.settings.display_hidden_messages = enabled
            }
        }
        self.ctx
            .connections
            .store_connection(&instance.id, mattermost_user_id, connection)
            .await?;

        let state = if enabled { "on" } else { "off" };
        info!(setting = %kind, state, mattermost_user_id, "Updated user setting");
        Ok(format!("Settings updated. {kind} {state}."))
    }
}
