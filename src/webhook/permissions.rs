//! Visibility check for subscription owners.

use tracing::debug;

use super::WebhookError;
use super::parser::{ParsedWebhook, PermissionScope};
use crate::models::{Connection, Instance};
use crate::repositories::ConnectionStore;
use crate::tracker::{TrackerClientFactory, TrackerError};

/// Verifies, with the user's own tracker client, that `mattermost_user_id` can
/// see the webhook's issue. Returns the user's connection on success.
///
/// # Errors
///
/// * [`WebhookError::PermissionDenied`] when the user has no connection, no
///   usable credentials, or the tracker refuses access.
/// * [`WebhookError::UpstreamUnavailable`] for any other tracker failure.
/// * [`WebhookError::StoreUnavailable`] when the connection store fails.
pub async fn check_permissions(
    factory: &dyn TrackerClientFactory,
    connections: &dyn ConnectionStore,
    instance: &Instance,
    webhook: &ParsedWebhook,
    mattermost_user_id: &str,
) -> Result<Connection, WebhookError> {
    let denied = |reason: String| WebhookError::PermissionDenied {
        recipient: mattermost_user_id.to_string(),
        reason,
    };

    let connection = match connections
        .load_connection(&instance.id, mattermost_user_id)
        .await
    {
        Ok(connection) => connection,
        Err(err) if err.is_not_found() => {
            return Err(denied("user is not connected to the instance".to_string()));
        }
        Err(err) => return Err(err.into()),
    };

    let client = factory
        .client_for(instance, Some(&connection))
        .map_err(|err| match err {
            TrackerError::MissingCredentials(reason) => denied(reason),
            other => other.into(),
        })?;

    let result = match webhook.event.check_permissions() {
        PermissionScope::Issue => client.get_issue(&webhook.issue.key).await.map(|_| ()),
        PermissionScope::Project => {
            let project_key = webhook.issue.project_key().unwrap_or_default();
            client.list_projects().await.and_then(|projects| {
                if projects.iter().any(|p| p.key == project_key) {
                    Ok(())
                } else {
                    Err(TrackerError::Forbidden(format!(
                        "project {project_key} is not visible"
                    )))
                }
            })
        }
    };

    match result {
        Ok(()) => {
            debug!(
                mattermost_user_id,
                issue_key = %webhook.issue.key,
                "Permission check passed"
            );
            Ok(connection)
        }
        Err(err) if err.is_access_denied() => Err(denied(err.to_string())),
        Err(err) => Err(err.into()),
    }
}
