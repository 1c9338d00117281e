//! Replaces partial issue stubs with the full issue.

use tracing::debug;

use super::WebhookError;
use super::parser::ParsedWebhook;
use crate::models::Instance;
use crate::tracker::TrackerClientFactory;

/// Fetches the full issue with the instance bot client when the payload only
/// carried a stub. No-op otherwise.
///
/// # Errors
///
/// Any tracker failure (unreachable, missing credentials, issue deleted or
/// hidden from the bot) is returned as [`WebhookError::UpstreamUnavailable`].
pub async fn expand_issue(
    factory: &dyn TrackerClientFactory,
    instance: &Instance,
    webhook: &mut ParsedWebhook,
) -> Result<(), WebhookError> {
    if !webhook.expand_issue() {
        return Ok(());
    }

    let client = factory.client_for(instance, None)?;
    let issue = client.get_issue(&webhook.issue.key).await?;
    debug!(issue_key = %issue.key, "Expanded partial issue");

    webhook.issue = issue;
    webhook.partial_issue = false;
    Ok(())
}
