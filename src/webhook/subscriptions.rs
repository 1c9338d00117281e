//! Resolves which channel subscriptions a webhook should be posted to.

use tracing::debug;

use super::WebhookError;
use super::parser::{EVENT_UPDATED_PREFIX, ParsedWebhook};
use crate::models::{ChannelSubscription, InstanceId};
use crate::repositories::SubscriptionStore;

/// Loads the instance's subscriptions and keeps those whose filters match,
/// preserving store order.
///
/// # Errors
///
/// Returns [`WebhookError::StoreUnavailable`] when the subscription store fails.
pub async fn get_channels_subscribed(
    store: &dyn SubscriptionStore,
    webhook: &ParsedWebhook,
    instance_id: &InstanceId,
) -> Result<Vec<ChannelSubscription>, WebhookError> {
    let subscriptions = store.list_for_instance(instance_id).await?;
    let total = subscriptions.len();

    let matched: Vec<ChannelSubscription> = subscriptions
        .into_iter()
        .filter(|sub| subscription_matches(sub, webhook, instance_id))
        .collect();

    debug!(
        instance_id = %instance_id,
        issue_key = %webhook.issue.key,
        total,
        matched = matched.len(),
        "Resolved channel subscriptions"
    );
    Ok(matched)
}

/// Whether a single subscription's filters accept the webhook.
pub fn subscription_matches(
    subscription: &ChannelSubscription,
    webhook: &ParsedWebhook,
    instance_id: &InstanceId,
) -> bool {
    let filters = &subscription.filters;
    if &subscription.instance_id != instance_id || !filters.is_well_formed() {
        return false;
    }

    let Some(project_key) = webhook.issue.project_key() else {
        return false;
    };
    if !filters.projects.contains(project_key) {
        return false;
    }

    if !filters.issue_types.is_empty() {
        let Some(issue_type) = webhook.issue.issue_type() else {
            return false;
        };
        if !filters.issue_types.contains(&issue_type.id)
            && !filters.issue_types.contains(&issue_type.name)
        {
            return false;
        }
    }

    let wants_any_update = filters.wants_any_update()
        && webhook
            .event_types
            .iter()
            .any(|event| event.starts_with(EVENT_UPDATED_PREFIX));
    if !wants_any_update && filters.events.is_disjoint(&webhook.event_types) {
        return false;
    }

    filters
        .fields
        .iter()
        .all(|field| field.matches(&webhook.issue.field_values(&field.key)))
}
