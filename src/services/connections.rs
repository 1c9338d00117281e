//! Linking chat users to their tracker accounts.

use tracing::info;

use super::{IssueActionError, ServiceContext};
use crate::models::{Connection, Instance, TrackerUser};
use crate::repositories::RepositoryError;
use crate::tracker::TrackerError;

pub struct ConnectionService {
    ctx: ServiceContext,
}

impl ConnectionService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Verifies `access_token` against the tracker and stores the resulting
    /// connection. Settings survive a reconnect.
    pub async fn connect(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        access_token: &str,
    ) -> Result<(Instance, Connection), IssueActionError> {
        let token = access_token.trim();
        if token.is_empty() {
            return Err(IssueActionError::Validation(
                "access_token must not be empty".to_string(),
            ));
        }

        let instance = self.ctx.resolve_instance(instance_id).await?;
        let candidate = Connection::from_tracker_user(&TrackerUser::default(), token);
        let client = self.ctx.trackers.client_for(&instance, Some(&candidate))?;
        let myself = client.get_myself().await.map_err(|err| match err {
            TrackerError::Unauthorized | TrackerError::Forbidden(_) => {
                IssueActionError::Forbidden("Jira rejected the access token".to_string())
            }
            other => IssueActionError::Tracker(other),
        })?;

        let mut connection = Connection::from_tracker_user(&myself, token);
        match self
            .ctx
            .connections
            .load_connection(&instance.id, mattermost_user_id)
            .await
        {
            Ok(previous) => {
                connection.settings = previous.settings;
                connection.default_project_key = previous.default_project_key;
            }
            Err(RepositoryError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        self.ctx
            .connections
            .store_connection(&instance.id, mattermost_user_id, connection.clone())
            .await?;

        info!(
            instance_id = %instance.id,
            mattermost_user_id,
            account = myself.account_ref().unwrap_or(&myself.self_url),
            "Connected user"
        );
        Ok((instance, connection))
    }

    pub async fn disconnect(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
    ) -> Result<Connection, IssueActionError> {
        let instance = self.ctx.resolve_instance(instance_id).await?;
        let connection = self.ctx.load_connection(&instance, mattermost_user_id).await?;
        self.ctx
            .connections
            .delete_connection(&instance.id, mattermost_user_id)
            .await?;

        info!(instance_id = %instance.id, mattermost_user_id, "Disconnected user");
        Ok(connection)
    }

    pub async fn get_connection(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
    ) -> Result<(Instance, Connection), IssueActionError> {
        let instance = self.ctx.resolve_instance(instance_id).await?;
        let connection = self.ctx.load_connection(&instance, mattermost_user_id).await?;
        Ok((instance, connection))
    }
}
