//! Tracker instances the bridge is installed against.

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stable identifier of a tracker instance (normally its base URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL-safe encoding used in `/instance/{encoded}/webhook` routes.
    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Inverse of [`InstanceId::encoded`]; `None` when the segment is not valid base64/UTF-8.
    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
        String::from_utf8(bytes).ok().map(Self)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Deployment flavour of a tracker instance; selects REST dialect details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    #[default]
    Cloud,
    Server,
}

impl FromStr for InstanceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(Self::Cloud),
            "server" | "datacenter" => Ok(Self::Server),
            other => Err(format!("unknown instance type '{other}'")),
        }
    }
}

/// A registered tracker instance. Immutable once loaded and shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Instance {
    pub id: InstanceId,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Credential used for bot-level reads (issue expansion).
    #[serde(default, skip_serializing)]
    pub bot_token: Option<String>,
}

impl Instance {
    /// Builds an instance whose id is its normalized base URL.
    pub fn new(base_url: &str, instance_type: InstanceType) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            id: InstanceId::new(base_url.clone()),
            instance_type,
            base_url,
            alias: None,
            bot_token: None,
        }
    }

    pub fn jira_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn browse_url(&self, issue_key: &str) -> String {
        format!("{}/browse/{}", self.jira_base_url(), issue_key)
    }

    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.base_url)
    }
}
