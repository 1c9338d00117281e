//! # Common API Types
//!
//! Request and response shapes shared by several handlers.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// User-facing outcome of an action
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionResponse {
    /// Message shown to the user
    pub message: String,
}

impl ActionResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Optional instance selector; defaults to the only installed instance
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InstanceQuery {
    /// Instance id (tracker base URL)
    #[serde(default)]
    pub instance_id: Option<String>,
}
