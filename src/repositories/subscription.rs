//! In-memory subscription store

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepositoryError, SubscriptionStore};
use crate::models::{ChannelSubscription, InstanceId};

/// Subscriptions grouped per instance, kept in creation order.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<HashMap<InstanceId, Vec<ChannelSubscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given records verbatim, including legacy
    /// records without a creator.
    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = ChannelSubscription>) -> Self {
        let mut map: HashMap<InstanceId, Vec<ChannelSubscription>> = HashMap::new();
        for subscription in subscriptions {
            map.entry(subscription.instance_id.clone())
                .or_default()
                .push(subscription);
        }
        Self {
            subscriptions: RwLock::new(map),
        }
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_for_channel(
        &self,
        instance_id: &InstanceId,
        channel_id: &str,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError> {
        Ok(self
            .list_for_instance(instance_id)
            .await?
            .into_iter()
            .filter(|sub| sub.channel_id == channel_id)
            .collect())
    }

    async fn create(
        &self,
        mut subscription: ChannelSubscription,
    ) -> Result<ChannelSubscription, RepositoryError> {
        if subscription.id.is_empty() {
            subscription.id = Uuid::new_v4().simple().to_string();
        }

        let mut guard = self.subscriptions.write().await;
        let entries = guard.entry(subscription.instance_id.clone()).or_default();
        if entries.iter().any(|existing| {
            existing.id == subscription.id
                || (!subscription.name.is_empty()
                    && existing.channel_id == subscription.channel_id
                    && existing.name == subscription.name)
        }) {
            return Err(RepositoryError::Conflict {
                entity: "subscription",
                key: subscription.name.clone(),
            });
        }
        entries.push(subscription.clone());
        Ok(subscription)
    }

    async fn edit(&self, subscription: ChannelSubscription) -> Result<(), RepositoryError> {
        let mut guard = self.subscriptions.write().await;
        let existing = guard
            .get_mut(&subscription.instance_id)
            .and_then(|entries| entries.iter_mut().find(|s| s.id == subscription.id))
            .ok_or_else(|| RepositoryError::not_found("subscription", subscription.id.clone()))?;
        *existing = subscription;
        Ok(())
    }

    async fn delete(&self, instance_id: &InstanceId, id: &str) -> Result<(), RepositoryError> {
        let mut guard = self.subscriptions.write().await;
        let entries = guard
            .get_mut(instance_id)
            .ok_or_else(|| RepositoryError::not_found("subscription", id))?;
        let before = entries.len();
        entries.retain(|s| s.id != id);
        if entries.len() == before {
            return Err(RepositoryError::not_found("subscription", id));
        }
        Ok(())
    }
}
