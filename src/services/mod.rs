//! # Services
//!
//! User-initiated operations behind the HTTP API: issue actions, searches,
//! settings, connections, channel subscriptions and the bot API. Services act with the requesting
//! user's own tracker client and report problems through [`IssueActionError`],
//! whose messages are meant to be shown to that user.

use std::sync::Arc;

use thiserror::Error;

use crate::chat::{ChatError, ChatSink};
use crate::models::{Connection, Instance, InstanceId};
use crate::repositories::{ConnectionStore, InstanceStore, RepositoryError, SubscriptionStore};
use crate::tracker::{TrackerClient, TrackerClientFactory, TrackerError};

pub mod backdoor;
pub mod connections;
pub mod issues;
pub mod search;
pub mod settings;
pub mod subscriptions;

pub use backdoor::{BackdoorService, WorklogRequest};
pub use connections::ConnectionService;
pub use issues::{
    AttachCommentRequest, AttachedComment, CreateIssueRequest, CreatedIssueOutcome, IssueService,
    TransitionRequest, UpdateIssueRequest,
};
pub use search::{ProjectMetadata, SearchQuery, SearchService, SelectOption};
pub use settings::{SettingKind, SettingsService};
pub use subscriptions::SubscriptionService;

pub const ISSUE_NOT_FOUND_MESSAGE: &str = "we couldn't find the issue key, or you do not have the appropriate permissions to view the issue. Please try again or contact your Jira administrator";
pub const NO_PERMISSION_MESSAGE: &str = "you do not have the appropriate permissions to perform this action. Please contact your Jira administrator";

#[derive(Debug, Error)]
pub enum IssueActionError {
    #[error("your account is not connected to Jira instance {0}")]
    NotConnected(String),
    #[error("Jira instance not found: {0}")]
    InstanceNotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("request to Jira failed: {0}")]
    Tracker(#[from] TrackerError),
    #[error("request to the chat server failed: {0}")]
    Chat(#[from] ChatError),
    #[error("store unavailable: {0}")]
    Store(RepositoryError),
}

impl IssueActionError {
    /// Maps a tracker failure on an issue read to the message users see.
    pub fn from_issue_lookup(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) => IssueActionError::NotFound(ISSUE_NOT_FOUND_MESSAGE.to_string()),
            TrackerError::Unauthorized | TrackerError::Forbidden(_) => IssueActionError::Forbidden(
                "you do not have the appropriate permissions to view the issue. Please contact your Jira administrator".to_string(),
            ),
            other => IssueActionError::Tracker(other),
        }
    }
}

impl From<RepositoryError> for IssueActionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict { .. } => IssueActionError::Conflict(err.to_string()),
            RepositoryError::NotFound { .. } => IssueActionError::NotFound(err.to_string()),
            RepositoryError::Unavailable(_) => IssueActionError::Store(err),
        }
    }
}

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct ServiceContext {
    pub instances: Arc<dyn InstanceStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub trackers: Arc<dyn TrackerClientFactory>,
    pub chat: Arc<dyn ChatSink>,
}

/// A user's client for one instance, with the records it was built from.
pub struct UserClient {
    pub client: Arc<dyn TrackerClient>,
    pub instance: Instance,
    pub connection: Connection,
}

impl ServiceContext {
    /// Loads the named instance, or the only installed instance when no id is given.
    pub async fn resolve_instance(
        &self,
        instance_id: Option<&str>,
    ) -> Result<Instance, IssueActionError> {
        match instance_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self
                .instances
                .load_instance(&InstanceId::from(id))
                .await
                .map_err(|err| match err {
                    RepositoryError::NotFound { .. } => {
                        IssueActionError::InstanceNotFound(id.to_string())
                    }
                    other => other.into(),
                }),
            None => {
                let mut instances = self.instances.load_instances().await?;
                match instances.len() {
                    1 => Ok(instances.remove(0)),
                    0 => Err(IssueActionError::InstanceNotFound(
                        "no Jira instance is installed".to_string(),
                    )),
                    _ => Err(IssueActionError::Validation(
                        "several Jira instances are installed, please specify instance_id"
                            .to_string(),
                    )),
                }
            }
        }
    }

    pub async fn load_connection(
        &self,
        instance: &Instance,
        mattermost_user_id: &str,
    ) -> Result<Connection, IssueActionError> {
        self.connections
            .load_connection(&instance.id, mattermost_user_id)
            .await
            .map_err(|err| match err {
                RepositoryError::NotFound { .. } => {
                    IssueActionError::NotConnected(instance.display_name().to_string())
                }
                other => other.into(),
            })
    }

    /// Instance, connection and tracker client for `mattermost_user_id`.
    pub async fn user_client(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
    ) -> Result<UserClient, IssueActionError> {
        let instance = self.resolve_instance(instance_id).await?;
        let connection = self.load_connection(&instance, mattermost_user_id).await?;
        let client = self.trackers.client_for(&instance, Some(&connection))?;
        Ok(UserClient {
            client,
            instance,
            connection,
        })
    }
}
