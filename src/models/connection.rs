//! A chat user's link to a tracker account.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::issue::TrackerUser;

/// Per-connection notification preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSettings {
    /// Receive direct messages for assignments and mentions.
    #[serde(default = "default_true")]
    pub notifications: bool,
    /// Show restricted comments in channel notifications and reply publicly to actions.
    #[serde(default)]
    pub display_hidden_messages: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            notifications: true,
            display_hidden_messages: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Connection between a chat user and their tracker identity on one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Tracker `self` URL of the connected account.
    #[serde(rename = "self")]
    pub self_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing)]
    pub access_token: String,
    #[serde(default)]
    pub settings: ConnectionSettings,
    /// Project the user last created an issue in; preselected next time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_project_key: Option<String>,
}

impl Connection {
    pub fn from_tracker_user(user: &TrackerUser, access_token: impl Into<String>) -> Self {
        Self {
            self_url: user.self_url.clone(),
            account_id: user.account_id.clone(),
            name: user.name.clone(),
            display_name: user.display_name.clone(),
            access_token: access_token.into(),
            settings: ConnectionSettings::default(),
            default_project_key: None,
        }
    }

    /// Tracker identity as a user record, for comparisons with webhook actors.
    pub fn tracker_user(&self) -> TrackerUser {
        TrackerUser {
            self_url: self.self_url.clone(),
            account_id: self.account_id.clone(),
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            ..Default::default()
        }
    }

    /// True when `actor` is the account behind this connection.
    pub fn is_actor(&self, actor: &TrackerUser) -> bool {
        if self.self_url.is_empty() || actor.self_url.is_empty() {
            return false;
        }
        self.self_url == actor.self_url
    }
}
