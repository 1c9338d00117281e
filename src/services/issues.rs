//! Issue actions performed on behalf of a connected chat user.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::{IssueActionError, NO_PERMISSION_MESSAGE, ServiceContext};
use crate::chat::{ChatError, ChatSink};
use crate::models::issue::{Project, Resolution};
use crate::models::{
    Comment, Connection, Instance, InstanceType, Issue, Post, TrackerUser, Transition,
};
use crate::tracker::{TrackerClient, TrackerError};
use crate::webhook::formatter::{ActionReply, action_reply, issue_attachment, titled_link};

/// Shortest assignee query accepted by [`IssueService::assign_issue`].
pub const MIN_USER_SEARCH_QUERY_LENGTH: usize = 3;
const ASSIGNEE_SEARCH_LIMIT: u32 = 10;
const FAILED_ATTACHMENT_DETAIL_LIMIT: usize = 2048;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TransitionRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub issue_key: String,
    /// Target state, matched case-insensitively against transition targets.
    pub to_state: String,
    #[serde(default)]
    pub resolution: Option<String>,
    /// Channel to confirm in; the confirmation is skipped when absent.
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub root_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AttachCommentRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub post_id: String,
    /// Team name used to build the post permalink.
    pub current_team: String,
    #[serde(rename = "issueKey", alias = "issue_key")]
    pub issue_key: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateIssueRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Jira `fields` object of the new issue; `project.key` is required.
    #[schema(value_type = Object)]
    pub fields: Map<String, Value>,
    /// Chat post the issue is created from, linked from the description.
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub current_team: String,
    /// `[field id, display name]` pairs the create form could not fill in.
    #[serde(default)]
    pub required_fields_not_covered: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateIssueRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub issue_key: String,
    /// Transition id to apply.
    #[serde(default)]
    pub transition: Option<String>,
    /// Account id (cloud) or username (server) of the new assignee.
    #[serde(default)]
    pub assignee: Option<String>,
}

/// Result of [`IssueService::create_issue`].
#[derive(Debug)]
pub struct CreatedIssueOutcome {
    /// The issue as read back after creation.
    pub issue: Issue,
    /// Background upload of the source post's files, when it had any.
    pub uploads: Option<JoinHandle<()>>,
}

/// Result of [`IssueService::attach_comment_to_issue`].
#[derive(Debug)]
pub struct AttachedComment {
    pub comment: Comment,
    pub reply: Post,
    /// Background upload of the post's files, when it had any.
    pub uploads: Option<JoinHandle<()>>,
}

pub struct IssueService {
    ctx: ServiceContext,
    site_url: String,
    max_attachment_size_bytes: u64,
}

impl IssueService {
    pub fn new(ctx: ServiceContext, site_url: impl Into<String>, max_attachment_size_bytes: u64) -> Self {
        Self {
            ctx,
            site_url: site_url.into().trim_end_matches('/').to_string(),
            max_attachment_size_bytes,
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Moves an issue to the state matching `request.to_state` and returns the
    /// confirmation message.
    pub async fn transition_issue(
        &self,
        mattermost_user_id: &str,
        request: &TransitionRequest,
    ) -> Result<String, IssueActionError> {
        let user = self
            .ctx
            .user_client(request.instance_id.as_deref(), mattermost_user_id)
            .await?;
        let key = request.issue_key.trim().to_uppercase();

        let transitions = list_transitions(user.client.as_ref(), &key).await?;
        let transition = find_matching_transition(&transitions, &request.to_state)?;

        let resolution = match request.resolution.as_deref().map(str::trim) {
            Some(wanted) if !wanted.is_empty() => {
                let resolutions = user.client.get_resolutions().await?;
                Some(find_matching_resolution(&resolutions, wanted)?.name.clone())
            }
            _ => None,
        };

        user.client
            .do_transition(&key, &transition.id, resolution.as_deref())
            .await?;

        let mut message = format!(
            "[{key}]({}) transitioned to `{}`",
            user.instance.browse_url(&key),
            transition.to.name
        );
        if let Some(resolution) = &resolution {
            message.push_str(&format!(" with resolution `{resolution}`"));
        }

        // The issue must still be readable after the transition.
        user.client
            .get_issue(&key)
            .await
            .map_err(IssueActionError::from_issue_lookup)?;

        info!(
            issue_key = %key,
            transition_id = %transition.id,
            mattermost_user_id,
            "Transitioned issue"
        );
        Ok(message)
    }

    /// Assigns the single user matching `user_search` and returns the confirmation.
    pub async fn assign_issue(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        issue_key: &str,
        user_search: &str,
    ) -> Result<String, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let key = issue_key.trim().to_uppercase();
        let query = user_search.trim();

        if query.chars().count() < MIN_USER_SEARCH_QUERY_LENGTH {
            return Err(IssueActionError::Validation(format!(
                "`{query}` contains less than {MIN_USER_SEARCH_QUERY_LENGTH} characters."
            )));
        }

        user.client.get_issue(&key).await.map_err(|err| match err {
            TrackerError::Unauthorized | TrackerError::Forbidden(_) => {
                IssueActionError::Forbidden(NO_PERMISSION_MESSAGE.to_string())
            }
            _ => IssueActionError::NotFound(format!(
                "We couldn't find the issue key `{key}`.  Please confirm the issue key and try again."
            )),
        })?;

        let mut candidates = user
            .client
            .search_users_assignable_to_issue(&key, query, ASSIGNEE_SEARCH_LIMIT)
            .await
            .map_err(|err| match err {
                TrackerError::Unauthorized => {
                    IssueActionError::Forbidden(NO_PERMISSION_MESSAGE.to_string())
                }
                other => IssueActionError::Tracker(other),
            })?;

        let mut assignee = select_single_assignee(&mut candidates, query)?;
        if assignee.account_id.as_deref().is_some_and(|id| !id.is_empty()) {
            assignee.name = None;
        }

        user.client
            .update_assignee(&key, Some(&assignee))
            .await
            .map_err(map_write_error)?;

        info!(issue_key = %key, mattermost_user_id, "Assigned issue");
        Ok(format!(
            "`{}` assigned to Jira issue [{key}]({})",
            assignee.display_name,
            user.instance.browse_url(&key)
        ))
    }

    pub async fn unassign_issue(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        issue_key: &str,
    ) -> Result<String, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let key = issue_key.trim().to_uppercase();

        user.client.get_issue(&key).await.map_err(|_| {
            IssueActionError::NotFound(format!(
                "We couldn't find the issue key `{key}`.  Please confirm the issue key and try again."
            ))
        })?;
        user.client
            .update_assignee(&key, None)
            .await
            .map_err(map_write_error)?;

        info!(issue_key = %key, mattermost_user_id, "Unassigned issue");
        Ok(format!(
            "Unassigned Jira issue [{key}]({})",
            user.instance.browse_url(&key)
        ))
    }

    pub async fn get_issue_by_key(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        issue_key: &str,
    ) -> Result<Issue, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        user.client
            .get_issue(issue_key.trim())
            .await
            .map_err(IssueActionError::from_issue_lookup)
    }

    /// Posts an issue card into a channel as the requesting user and removes
    /// the ephemeral preview it replaces.
    pub async fn share_issue_publicly(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        channel_id: &str,
        issue_key: &str,
        ephemeral_post_id: &str,
    ) -> Result<Post, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let issue = user
            .client
            .get_issue(issue_key.trim())
            .await
            .map_err(IssueActionError::from_issue_lookup)?;

        let post = Post::new(mattermost_user_id, channel_id, "")
            .with_root(ephemeral_post_id)
            .with_attachments(vec![issue_attachment(&user.instance, &issue)]);
        let created = self.ctx.chat.create_post(post).await?;

        if let Err(err) = self
            .ctx
            .chat
            .delete_ephemeral_post(mattermost_user_id, ephemeral_post_id)
            .await
        {
            warn!(error = %err, post_id = ephemeral_post_id, "Failed to remove ephemeral preview");
        }
        Ok(created)
    }

    /// Copies a chat post into a comment on the issue, then uploads the
    /// post's files in the background and links them from the comment.
    pub async fn attach_comment_to_issue(
        &self,
        mattermost_user_id: &str,
        request: &AttachCommentRequest,
    ) -> Result<AttachedComment, IssueActionError> {
        let user = self
            .ctx
            .user_client(request.instance_id.as_deref(), mattermost_user_id)
            .await?;
        let key = request.issue_key.trim().to_uppercase();

        let post = self
            .ctx
            .chat
            .get_post(&request.post_id)
            .await
            .map_err(|err| lookup_failure(err, format!("failed to load post {}", request.post_id)))?;
        let author = self.ctx.chat.get_user(&post.user_id).await.map_err(|err| {
            lookup_failure(err, format!("failed to load post.UserID {}: not found", post.user_id))
        })?;

        let permalink = format!("{}/{}/pl/{}", self.site_url, request.current_team, request.post_id);
        let body = format!(
            "*@{} attached a* [message|{permalink}] *from @{}*\n{}",
            user.connection.display_name, author.username, post.message
        );

        let comment = user.client.add_comment(&key, &body).await.map_err(|err| match err {
            TrackerError::Unauthorized | TrackerError::Forbidden(_) => IssueActionError::Forbidden(
                "you do not have permission to create a comment in the selected Jira issue. Please choose another issue or contact your Jira admin".to_string(),
            ),
            other => IssueActionError::Tracker(other),
        })?;

        let uploads = (!post.file_ids.is_empty()).then(|| {
            let upload = AttachmentUpload {
                client: Arc::clone(&user.client),
                chat: Arc::clone(&self.ctx.chat),
                issue_key: key.clone(),
                comment: Some(comment.clone()),
                file_ids: post.file_ids.clone(),
                mattermost_user_id: mattermost_user_id.to_string(),
                max_size_bytes: self.max_attachment_size_bytes,
            };
            tokio::spawn(upload.run())
        });

        let root_id = if post.root_id.is_empty() {
            request.post_id.clone()
        } else {
            post.root_id.clone()
        };
        let reply = Post::new(
            mattermost_user_id,
            post.channel_id.clone(),
            format!(
                "Message attached to [{key}]({})",
                user.instance.browse_url(&key)
            ),
        )
        .with_root(root_id);
        let reply = self.ctx.chat.create_post(reply).await?;

        info!(
            issue_key = %key,
            post_id = %request.post_id,
            files = post.file_ids.len(),
            "Attached message to issue"
        );
        Ok(AttachedComment {
            comment,
            reply,
            uploads,
        })
    }

    /// Tells the user in `channel_id` how an action went: publicly in the
    /// thread when they asked to see hidden messages, ephemerally otherwise.
    pub async fn create_notification_post(
        &self,
        connection: &Connection,
        mattermost_user_id: &str,
        channel_id: &str,
        root_id: &str,
        message: &str,
    ) -> Result<(), IssueActionError> {
        let display_hidden = connection.settings.display_hidden_messages && !channel_id.is_empty();
        let username = if display_hidden {
            self.ctx.chat.get_user(mattermost_user_id).await?.username
        } else {
            String::new()
        };

        let bot = self.ctx.chat.bot_user_id().to_string();
        match action_reply(&bot, channel_id, root_id, &username, message, display_hidden) {
            ActionReply::Public(post) => {
                self.ctx.chat.create_post(post).await?;
            }
            ActionReply::Ephemeral(post) => {
                self.ctx
                    .chat
                    .send_ephemeral_post(mattermost_user_id, post)
                    .await?;
            }
        }
        Ok(())
    }

    /// Best-effort ephemeral note after a failed action.
    pub async fn report_failure(&self, mattermost_user_id: &str, channel_id: &str, message: &str) {
        if channel_id.is_empty() {
            return;
        }
        let post = Post::new(self.ctx.chat.bot_user_id(), channel_id, message);
        if let Err(err) = self.ctx.chat.send_ephemeral_post(mattermost_user_id, post).await {
            warn!(error = %err, channel_id, "Failed to send failure notice");
        }
    }

    /// Creates an issue from the form fields, optionally linked to the chat
    /// post it came from, and announces it in the originating channel.
    ///
    /// When the project needs fields the form could not provide, the user is
    /// sent a link to finish the issue in Jira instead.
    pub async fn create_issue(
        &self,
        mattermost_user_id: &str,
        request: &CreateIssueRequest,
    ) -> Result<CreatedIssueOutcome, IssueActionError> {
        let user = self
            .ctx
            .user_client(request.instance_id.as_deref(), mattermost_user_id)
            .await?;
        let mut fields = request.fields.clone();

        let post_id = request.post_id.as_deref().filter(|id| !id.is_empty());
        let post = match post_id {
            Some(post_id) => Some(
                self.ctx
                    .chat
                    .get_post(post_id)
                    .await
                    .map_err(|err| lookup_failure(err, format!("failed to load post {post_id}")))?,
            ),
            None => None,
        };
        if let Some(post_id) = post_id {
            let permalink = format!("{}/{}/pl/{post_id}", self.site_url, request.current_team);
            let note = format!("_Issue created from a [message in Mattermost|{permalink}]_.");
            let description = match fields.get("description").and_then(Value::as_str) {
                Some(existing) if !existing.is_empty() => format!("{existing}\n\n{note}"),
                _ => note,
            };
            fields.insert("description".to_string(), Value::String(description));
        }

        let (channel_id, root_id) = match (&post, post_id) {
            (Some(post), Some(post_id)) if post.root_id.is_empty() => {
                (post.channel_id.clone(), post_id.to_string())
            }
            (Some(post), _) => (post.channel_id.clone(), post.root_id.clone()),
            _ => (request.channel_id.clone(), String::new()),
        };

        let mut not_covered = request.required_fields_not_covered.clone();
        if let Some(pos) = not_covered
            .iter()
            .position(|field| field.first().is_some_and(|id| id.eq_ignore_ascii_case("reporter")))
        {
            not_covered.remove(pos);
            if user.instance.instance_type == InstanceType::Server
                && let Some(name) = user.connection.name.as_deref()
            {
                fields.insert("reporter".to_string(), json!({ "name": name }));
            }
        }

        let project_key = fields
            .get("project")
            .and_then(|p| p.get("key"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                IssueActionError::Validation("fields.project.key must not be empty".to_string())
            })?;
        let project = user.client.get_project(&project_key).await.map_err(|err| match err {
            TrackerError::NotFound(_) => {
                IssueActionError::NotFound(format!("failed to get project \"{project_key}\""))
            }
            other => IssueActionError::Tracker(other),
        })?;

        if !not_covered.is_empty() {
            let message = "The project you tried to create an issue for has **required fields** this plugin does not yet support:";
            let listed: String = not_covered
                .iter()
                .map(|field| format!("- {}\n", field.get(1).or(field.first()).map_or("", String::as_str)))
                .collect();
            let notice = format!(
                "[Please create your Jira issue manually]({}). {message}\n{listed}",
                manual_create_url(&user.instance, &project, &fields)
            );
            self.notify_ephemeral(mattermost_user_id, &channel_id, &root_id, notice)
                .await;
            return Err(IssueActionError::Validation(format!(
                "issue can not be created via API: {message}"
            )));
        }

        let created = match user.client.create_issue(&Value::Object(fields.clone())).await {
            Ok(created) => created,
            Err(err) if err.to_string().contains("is required.") => {
                let notice = format!(
                    "Failed to create issue. Your Jira project requires fields the plugin does not yet support. [Please create your Jira issue manually]({}) or contact your Jira administrator.\n{err}",
                    manual_create_url(&user.instance, &project, &fields)
                );
                self.notify_ephemeral(mattermost_user_id, &channel_id, &root_id, notice.clone())
                    .await;
                return Err(IssueActionError::Validation(format!(
                    "issue can not be created via API: {notice}"
                )));
            }
            Err(err) => return Err(map_write_error(err)),
        };

        // Creation only answers with identifiers.
        let issue = user
            .client
            .get_issue(&created.key)
            .await
            .map_err(IssueActionError::from_issue_lookup)?;

        let confirmation = Post::new(
            self.ctx.chat.bot_user_id(),
            channel_id.clone(),
            format!(
                "Created Jira issue [{}]({})",
                created.key,
                user.instance.browse_url(&created.key)
            ),
        )
        .with_root(root_id.clone())
        .with_attachments(vec![issue_attachment(&user.instance, &issue)]);
        if let Err(err) = self
            .ctx
            .chat
            .send_ephemeral_post(mattermost_user_id, confirmation)
            .await
        {
            warn!(error = %err, issue_key = %created.key, "Failed to confirm issue creation");
        }

        self.remember_default_project(&user.instance, mattermost_user_id, &user.connection, &project.key)
            .await;

        if !channel_id.is_empty() {
            let announcement = Post::new(
                mattermost_user_id,
                channel_id.clone(),
                format!("Created a Jira issue: {}", titled_link(&user.instance, &issue)),
            )
            .with_root(root_id.clone());
            if let Err(err) = self.ctx.chat.create_post(announcement).await {
                warn!(error = %err, issue_key = %created.key, "Failed to announce created issue");
            }
        }

        let uploads = post.filter(|p| !p.file_ids.is_empty()).map(|post| {
            let upload = AttachmentUpload {
                client: Arc::clone(&user.client),
                chat: Arc::clone(&self.ctx.chat),
                issue_key: created.key.clone(),
                comment: None,
                file_ids: post.file_ids,
                mattermost_user_id: mattermost_user_id.to_string(),
                max_size_bytes: self.max_attachment_size_bytes,
            };
            tokio::spawn(upload.run())
        });

        info!(
            issue_key = %created.key,
            project_key = %project.key,
            mattermost_user_id,
            "Created issue"
        );
        Ok(CreatedIssueOutcome { issue, uploads })
    }

    /// Applies a transition id and/or a new assignee, then returns the issue
    /// as it reads afterwards.
    pub async fn update_issue(
        &self,
        mattermost_user_id: &str,
        request: &UpdateIssueRequest,
    ) -> Result<Issue, IssueActionError> {
        let key = request.issue_key.trim().to_uppercase();
        if key.is_empty() {
            return Err(IssueActionError::Validation(
                "issue_key must not be empty".to_string(),
            ));
        }
        let transition = request.transition.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let assignee = request.assignee.as_deref().map(str::trim).filter(|a| !a.is_empty());
        if transition.is_none() && assignee.is_none() {
            return Err(IssueActionError::Validation(
                "Issue fields must not be empty".to_string(),
            ));
        }

        let user = self
            .ctx
            .user_client(request.instance_id.as_deref(), mattermost_user_id)
            .await?;

        if let Some(transition_id) = transition {
            user.client
                .do_transition(&key, transition_id, None)
                .await
                .map_err(map_write_error)?;
        }
        if let Some(account) = assignee {
            let found = user.client.get_user(account).await.map_err(|err| match err {
                TrackerError::NotFound(_) => IssueActionError::Validation(format!(
                    "we couldn't find the assignee `{account}`. Please use a Jira member and try again"
                )),
                other => IssueActionError::Tracker(other),
            })?;
            user.client
                .update_assignee(&key, Some(&found))
                .await
                .map_err(map_write_error)?;
        }

        info!(
            issue_key = %key,
            transitioned = transition.is_some(),
            reassigned = assignee.is_some(),
            mattermost_user_id,
            "Updated issue"
        );
        user.client
            .get_issue(&key)
            .await
            .map_err(IssueActionError::from_issue_lookup)
    }

    /// Transitions the user may apply to the issue.
    pub async fn get_issue_transitions(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        issue_key: &str,
    ) -> Result<Vec<Transition>, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        list_transitions(user.client.as_ref(), &issue_key.trim().to_uppercase()).await
    }

    /// Users the issue can be assigned to, for users allowed to change the assignee.
    pub async fn get_available_assignees(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
        issue_key: &str,
        query: &str,
    ) -> Result<Vec<TrackerUser>, IssueActionError> {
        let user = self.ctx.user_client(instance_id, mattermost_user_id).await?;
        let key = issue_key.trim().to_uppercase();

        let editable = user
            .client
            .get_edit_meta(&key)
            .await
            .map_err(IssueActionError::from_issue_lookup)?;
        if !editable.contains_key("assignee") {
            return Err(IssueActionError::Forbidden(
                "user does not have permission to change the assignee".to_string(),
            ));
        }

        Ok(user
            .client
            .search_users_assignable_to_issue(&key, query.trim(), ASSIGNEE_SEARCH_LIMIT)
            .await?)
    }

    async fn notify_ephemeral(&self, mattermost_user_id: &str, channel_id: &str, root_id: &str, message: String) {
        let post = Post::new(self.ctx.chat.bot_user_id(), channel_id, message).with_root(root_id);
        if let Err(err) = self.ctx.chat.send_ephemeral_post(mattermost_user_id, post).await {
            warn!(error = %err, channel_id, "Failed to send ephemeral notice");
        }
    }

    async fn remember_default_project(
        &self,
        instance: &Instance,
        mattermost_user_id: &str,
        connection: &Connection,
        project_key: &str,
    ) {
        if connection.default_project_key.as_deref() == Some(project_key) {
            return;
        }
        let mut updated = connection.clone();
        updated.default_project_key = Some(project_key.to_string());
        if let Err(err) = self
            .ctx
            .connections
            .store_connection(&instance.id, mattermost_user_id, updated)
            .await
        {
            warn!(error = %err, mattermost_user_id, "Failed to store default project");
        }
    }

    pub async fn connection_for(
        &self,
        instance_id: Option<&str>,
        mattermost_user_id: &str,
    ) -> Result<(Instance, Connection), IssueActionError> {
        let instance = self.ctx.resolve_instance(instance_id).await?;
        let connection = self.ctx.load_connection(&instance, mattermost_user_id).await?;
        Ok((instance, connection))
    }
}

async fn list_transitions(
    client: &dyn TrackerClient,
    key: &str,
) -> Result<Vec<Transition>, IssueActionError> {
    let transitions = client.get_transitions(key).await.map_err(|err| {
        warn!(error = %err, issue_key = %key, "Failed to list transitions");
        IssueActionError::NotFound(
            "we couldn't find the issue key. Please confirm the issue key and try again. You may not have permissions to access this issue".to_string(),
        )
    })?;
    if transitions.is_empty() {
        return Err(IssueActionError::Forbidden(NO_PERMISSION_MESSAGE.to_string()));
    }
    Ok(transitions)
}

/// Jira's own create screen, prefilled with what the form already had.
fn manual_create_url(instance: &Instance, project: &Project, fields: &Map<String, Value>) -> String {
    let base = format!("{}/secure/CreateIssueDetails!init.jspa", instance.jira_base_url());
    let mut params = vec![("pid", project.id.as_str())];
    if let Some(issue_type) = fields
        .get("issuetype")
        .and_then(|t| t.get("id"))
        .and_then(Value::as_str)
    {
        params.push(("issuetype", issue_type));
    }
    for name in ["summary", "description"] {
        if let Some(value) = fields.get(name).and_then(Value::as_str) {
            params.push((name, value));
        }
    }
    url::Url::parse_with_params(&base, &params).map_or(base, |url| url.to_string())
}

fn lookup_failure(err: ChatError, message: String) -> IssueActionError {
    match err {
        ChatError::Http { status: 404, .. } => IssueActionError::NotFound(message),
        other => IssueActionError::Chat(other),
    }
}

fn map_write_error(err: TrackerError) -> IssueActionError {
    match err {
        TrackerError::Unauthorized | TrackerError::Forbidden(_) => IssueActionError::Forbidden(
            "You do not have the appropriate permissions to perform this action. Please contact your Jira administrator.".to_string(),
        ),
        other => IssueActionError::Tracker(other),
    }
}

fn select_single_assignee(
    candidates: &mut Vec<TrackerUser>,
    query: &str,
) -> Result<TrackerUser, IssueActionError> {
    match candidates.len() {
        0 => Err(IssueActionError::Validation(
            "we couldn't find the assignee. Please use a Jira member and try again".to_string(),
        )),
        1 => Ok(candidates.remove(0)),
        count => {
            let mut message = format!(
                "`{query}` matches {count} or more users.  Please specify a unique assignee.\n"
            );
            for candidate in candidates.iter() {
                let mut details = Vec::new();
                if let Some(name) = candidate.name.as_deref().filter(|n| !n.is_empty()) {
                    details.push(name);
                }
                if let Some(email) = candidate.email_address.as_deref().filter(|e| !e.is_empty()) {
                    details.push(email);
                }
                message.push_str(&format!("* {}", candidate.display_name));
                if !details.is_empty() {
                    message.push_str(&format!(" ({})", details.join(", ")));
                }
                message.push('\n');
            }
            Err(IssueActionError::Validation(message))
        }
    }
}

/// Picks the one transition whose target state contains `wanted`, ignoring case.
pub fn find_matching_transition<'a>(
    transitions: &'a [Transition],
    wanted: &str,
) -> Result<&'a Transition, IssueActionError> {
    let needle = wanted.trim().to_lowercase();
    let matches: Vec<&Transition> = transitions
        .iter()
        .filter(|t| t.to.name.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [single] => Ok(single),
        [] => {
            let available: Vec<&str> = transitions.iter().map(|t| t.to.name.as_str()).collect();
            Err(IssueActionError::Validation(format!(
                "\"{wanted}\" is not a valid state. Please use one of: \"{}\"",
                available.join(", ")
            )))
        }
        several => {
            let names: Vec<&str> = several.iter().map(|t| t.to.name.as_str()).collect();
            Err(IssueActionError::Validation(format!(
                "please be more specific, \"{wanted}\" matched several states: \"{}\"",
                names.join(", ")
            )))
        }
    }
}

pub fn find_matching_resolution<'a>(
    resolutions: &'a [Resolution],
    wanted: &str,
) -> Result<&'a Resolution, IssueActionError> {
    let needle = wanted.trim().to_lowercase();
    let matches: Vec<&Resolution> = resolutions
        .iter()
        .filter(|r| r.name.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [single] => Ok(single),
        [] => {
            let available: Vec<&str> = resolutions.iter().map(|r| r.name.as_str()).collect();
            Err(IssueActionError::Validation(format!(
                "\"{wanted}\" is not a valid resolution. Please use one of: \"{}\"",
                available.join(", ")
            )))
        }
        several => {
            let names: Vec<&str> = several.iter().map(|r| r.name.as_str()).collect();
            Err(IssueActionError::Validation(format!(
                "please be more specific, \"{wanted}\" matched several resolutions: \"{}\"",
                names.join(", ")
            )))
        }
    }
}

/// Wiki markup linking an uploaded file from a comment.
fn attachment_markup(file_name: &str, mime_type: &str) -> String {
    let embeddable = ["image/", "video/", "audio/"]
        .iter()
        .any(|prefix| mime_type.starts_with(prefix));
    if embeddable {
        format!("\n\nAttachment: !{file_name}!")
    } else {
        format!("\n\nAttachment: [^{file_name}]")
    }
}

struct AttachmentUpload {
    client: Arc<dyn TrackerClient>,
    chat: Arc<dyn ChatSink>,
    issue_key: String,
    /// Comment that links the uploaded files; none when they only attach to the issue.
    comment: Option<Comment>,
    file_ids: Vec<String>,
    mattermost_user_id: String,
    max_size_bytes: u64,
}

impl AttachmentUpload {
    async fn run(self) {
        let mut links = String::new();
        for file_id in &self.file_ids {
            match self.upload(file_id).await {
                Ok(markup) => links.push_str(&markup),
                Err((context, detail)) => self.notify_failure(&context, &detail).await,
            }
        }
        let Some(comment) = self.comment.as_ref().filter(|_| !links.is_empty()) else {
            return;
        };

        let body = format!("{}{links}", comment.body);
        if let Err(err) = self
            .client
            .update_comment(&self.issue_key, &comment.id, &body)
            .await
        {
            self.notify_failure(
                "failed to completely update comment with attachments",
                &err.to_string(),
            )
            .await;
        }
    }

    async fn upload(&self, file_id: &str) -> Result<String, (String, String)> {
        let info = self
            .chat
            .get_file_info(file_id)
            .await
            .map_err(|err| (format!("file id {file_id}"), err.to_string()))?;
        let context = format!("file: {}", info.name);

        if info.size > self.max_size_bytes {
            return Err((
                context,
                format!(
                    "file is too large: {} bytes, the limit is {} bytes",
                    info.size, self.max_size_bytes
                ),
            ));
        }

        let data = self
            .chat
            .get_file(file_id)
            .await
            .map_err(|err| (context.clone(), err.to_string()))?;
        let uploaded = self
            .client
            .add_attachment(&self.issue_key, &info.name, &info.mime_type, data)
            .await
            .map_err(|err| (context.clone(), err.to_string()))?;

        let (name, mime) = uploaded
            .first()
            .map(|a| (a.filename.clone(), a.mime_type.clone()))
            .unwrap_or((info.name, info.mime_type));
        Ok(attachment_markup(&name, &mime))
    }

    async fn notify_failure(&self, context: &str, detail: &str) {
        let message = format!("Failed to attach to issue: {}, {context}", self.issue_key);
        error!(error = detail, issue_key = %self.issue_key, "{message}");

        let detail: String = detail.chars().take(FAILED_ATTACHMENT_DETAIL_LIMIT).collect();
        let dm = format!("{message}. Please notify your system administrator.\n{detail}");
        if let Err(err) = self.chat.send_direct_message(&self.mattermost_user_id, &dm).await {
            warn!(error = %err, "Failed to report attachment failure");
        }
    }
}
