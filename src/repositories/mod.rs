//! # Repository Layer
//!
//! Store interfaces for instances, user connections and channel subscriptions,
//! with thread-safe in-memory implementations. Every store must tolerate
//! concurrent reads from the webhook workers while HTTP handlers mutate it.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChannelSubscription, Connection, Instance, InstanceId, TrackerUser};

pub mod connection;
pub mod instance;
pub mod subscription;

pub use connection::InMemoryConnectionStore;
pub use instance::InMemoryInstanceStore;
pub use subscription::InMemorySubscriptionStore;

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn load_instance(&self, id: &InstanceId) -> Result<Instance, RepositoryError>;
    async fn load_instances(&self) -> Result<Vec<Instance>, RepositoryError>;
    async fn store_instance(&self, instance: Instance) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn load_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<Connection, RepositoryError>;

    async fn store_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
        connection: Connection,
    ) -> Result<(), RepositoryError>;

    async fn delete_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Reverse lookup: the chat user connected to the given tracker account.
    async fn load_chat_user_id(
        &self,
        instance_id: &InstanceId,
        tracker_user: &TrackerUser,
    ) -> Result<String, RepositoryError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions on an instance, in creation order.
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError>;

    async fn list_for_channel(
        &self,
        instance_id: &InstanceId,
        channel_id: &str,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError>;

    /// Persists a new subscription, assigning an id when none is set.
    async fn create(
        &self,
        subscription: ChannelSubscription,
    ) -> Result<ChannelSubscription, RepositoryError>;

    async fn edit(&self, subscription: ChannelSubscription) -> Result<(), RepositoryError>;

    async fn delete(&self, instance_id: &InstanceId, id: &str) -> Result<(), RepositoryError>;
}
