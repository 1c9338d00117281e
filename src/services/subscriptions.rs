//! Channel subscription management.

use tracing::info;

use super::{IssueActionError, ServiceContext};
use crate::models::{ChannelSubscription, InstanceId};

pub struct SubscriptionService {
    ctx: ServiceContext,
}

impl SubscriptionService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn validate(subscription: &ChannelSubscription) -> Result<(), IssueActionError> {
        if subscription.channel_id.trim().is_empty() {
            return Err(IssueActionError::Validation(
                "channel_id must not be empty".to_string(),
            ));
        }
        if !subscription.filters.is_well_formed() {
            return Err(IssueActionError::Validation(
                "a subscription needs at least one event, one project and well-formed field filters"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Creates a subscription owned by `mattermost_user_id`, who must be
    /// connected to the instance.
    pub async fn create(
        &self,
        mattermost_user_id: &str,
        mut subscription: ChannelSubscription,
    ) -> Result<ChannelSubscription, IssueActionError> {
        Self::validate(&subscription)?;
        let instance = self
            .ctx
            .resolve_instance(Some(subscription.instance_id.as_str()))
            .await?;
        self.ctx.load_connection(&instance, mattermost_user_id).await?;

        subscription.id = String::new();
        subscription.instance_id = instance.id.clone();
        subscription.mattermost_user_id = mattermost_user_id.to_string();

        let created = self.ctx.subscriptions.create(subscription).await?;
        info!(
            subscription_id = %created.id,
            channel_id = %created.channel_id,
            instance_id = %created.instance_id,
            "Created channel subscription"
        );
        Ok(created)
    }

    /// Replaces filters and name of an existing subscription. A record
    /// without a creator is adopted by the editor.
    pub async fn edit(
        &self,
        mattermost_user_id: &str,
        mut subscription: ChannelSubscription,
    ) -> Result<ChannelSubscription, IssueActionError> {
        Self::validate(&subscription)?;
        let instance = self
            .ctx
            .resolve_instance(Some(subscription.instance_id.as_str()))
            .await?;
        self.ctx.load_connection(&instance, mattermost_user_id).await?;

        let existing = self
            .ctx
            .subscriptions
            .list_for_instance(&instance.id)
            .await?
            .into_iter()
            .find(|s| s.id == subscription.id)
            .ok_or_else(|| {
                IssueActionError::NotFound(format!("subscription not found: {}", subscription.id))
            })?;

        subscription.instance_id = instance.id.clone();
        subscription.channel_id = existing.channel_id;
        subscription.mattermost_user_id = if existing.mattermost_user_id.is_empty() {
            mattermost_user_id.to_string()
        } else {
            existing.mattermost_user_id
        };

        self.ctx.subscriptions.edit(subscription.clone()).await?;
        info!(subscription_id = %subscription.id, "Edited channel subscription");
        Ok(subscription)
    }

    pub async fn delete(
        &self,
        instance_id: Option<&str>,
        id: &str,
    ) -> Result<(), IssueActionError> {
        let instance = self.ctx.resolve_instance(instance_id).await?;
        self.ctx.subscriptions.delete(&instance.id, id).await?;
        info!(subscription_id = id, instance_id = %instance.id, "Deleted channel subscription");
        Ok(())
    }

    pub async fn list_for_channel(
        &self,
        instance_id: Option<&str>,
        channel_id: &str,
    ) -> Result<(InstanceId, Vec<ChannelSubscription>), IssueActionError> {
        let instance = self.ctx.resolve_instance(instance_id).await?;
        let subscriptions = self
            .ctx
            .subscriptions
            .list_for_channel(&instance.id, channel_id)
            .await?;
        Ok((instance.id, subscriptions))
    }
}
