//! # Data Models
//!
//! Domain types shared by the webhook pipeline, the issue services and the HTTP layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod chat;
pub mod connection;
pub mod instance;
pub mod issue;
pub mod subscription;

pub use chat::{ChatUser, FileInfo, Post, SlackAttachment, SlackAttachmentField};
pub use connection::{Connection, ConnectionSettings};
pub use instance::{Instance, InstanceId, InstanceType};
pub use issue::{Comment, Issue, TrackerUser, Transition};
pub use subscription::{
    ChannelSubscription, FieldFilter, FieldInclusion, SelfRole, SubscriptionFilters,
};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "jira-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
