//! Calls made by allowlisted bots on behalf of another chat user, used by
//! companion integrations such as time tracking.

use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{IssueActionError, ServiceContext, UserClient};
use crate::models::issue::{Project, Worklog};
use crate::models::Issue;
use crate::tracker::TrackerError;

pub const NO_WORKLOG_PERMISSION_MESSAGE: &str = "user does not have permission to create worklog";

/// The user a bot acts for.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ActingUserQuery {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Chat user id whose connection is used
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ActingUserIssueQuery {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub user_id: String,
    pub issue_key: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ActingUserProjectQuery {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub user_id: String,
    pub project_key: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WorklogRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub user_id: String,
    pub issue_key: String,
    /// Time spent, in minutes.
    pub minutes: u32,
    #[serde(default)]
    pub comment: String,
}

pub struct BackdoorService {
    ctx: ServiceContext,
}

impl BackdoorService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn client(
        &self,
        instance_id: Option<&str>,
        user_id: &str,
    ) -> Result<UserClient, IssueActionError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(IssueActionError::Validation(
                "user_id must not be empty".to_string(),
            ));
        }
        self.ctx.user_client(instance_id, user_id).await
    }

    /// Succeeds when `user_id` has a usable connection to the instance.
    pub async fn check_auth(
        &self,
        instance_id: Option<&str>,
        user_id: &str,
    ) -> Result<(), IssueActionError> {
        self.client(instance_id, user_id).await.map(|_| ())
    }

    pub async fn get_issue(
        &self,
        instance_id: Option<&str>,
        user_id: &str,
        issue_key: &str,
    ) -> Result<Issue, IssueActionError> {
        let user = self.client(instance_id, user_id).await?;
        user.client
            .get_issue(issue_key.trim())
            .await
            .map_err(IssueActionError::from_issue_lookup)
    }

    pub async fn get_project(
        &self,
        instance_id: Option<&str>,
        user_id: &str,
        project_key: &str,
    ) -> Result<Project, IssueActionError> {
        let user = self.client(instance_id, user_id).await?;
        let key = project_key.trim();
        user.client.get_project(key).await.map_err(|err| match err {
            TrackerError::NotFound(_) => {
                IssueActionError::NotFound(format!("failed to get project \"{key}\""))
            }
            other => IssueActionError::Tracker(other),
        })
    }

    /// Succeeds when the user may log work on the issue.
    pub async fn check_worklog_permission(
        &self,
        instance_id: Option<&str>,
        user_id: &str,
        issue_key: &str,
    ) -> Result<(), IssueActionError> {
        let user = self.client(instance_id, user_id).await?;
        let allowed = user
            .client
            .has_worklog_permission(issue_key.trim())
            .await
            .map_err(IssueActionError::from_issue_lookup)?;
        if !allowed {
            return Err(IssueActionError::Forbidden(
                NO_WORKLOG_PERMISSION_MESSAGE.to_string(),
            ));
        }
        Ok(())
    }

    pub async fn add_worklog(&self, request: &WorklogRequest) -> Result<Worklog, IssueActionError> {
        if request.minutes == 0 {
            return Err(IssueActionError::Validation(
                "minutes must be greater than zero".to_string(),
            ));
        }
        let user = self
            .client(request.instance_id.as_deref(), &request.user_id)
            .await?;
        let key = request.issue_key.trim();

        let worklog = user
            .client
            .add_worklog(key, u64::from(request.minutes) * 60, &request.comment)
            .await
            .map_err(|err| match err {
                TrackerError::Unauthorized | TrackerError::Forbidden(_) => {
                    IssueActionError::Forbidden(NO_WORKLOG_PERMISSION_MESSAGE.to_string())
                }
                other => IssueActionError::from_issue_lookup(other),
            })?;

        info!(
            issue_key = key,
            user_id = %request.user_id,
            minutes = request.minutes,
            "Logged work"
        );
        Ok(worklog)
    }
}
