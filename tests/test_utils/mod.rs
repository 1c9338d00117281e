//! Test utilities shared by the integration tests.
//!
//! Provides in-process fakes for the tracker and chat server, recording every
//! call so tests can assert on side effects, plus builders for tracker webhook
//! payloads.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use jira_bridge::chat::{ChatError, ChatSink};
use jira_bridge::models::issue::{
    Attachment, CreatedIssue, IssueFields, IssueType, Project, Resolution, Status, Worklog,
};
use jira_bridge::models::{
    ChannelSubscription, ChatUser, Comment, Connection, FileInfo, Instance, InstanceId,
    InstanceType, Issue, Post, SubscriptionFilters, TrackerUser, Transition,
};
use jira_bridge::repositories::{
    ConnectionStore, InMemoryConnectionStore, InMemoryInstanceStore, InMemorySubscriptionStore,
    InstanceStore, RepositoryError, SubscriptionStore,
};
use jira_bridge::services::ServiceContext;
use jira_bridge::tracker::{TrackerClient, TrackerClientFactory, TrackerError};

pub const JIRA_URL: &str = "https://jira.example.com";
pub const BOT_USER_ID: &str = "bot-user";
pub const BOT_TOKEN: &str = "bot-token";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Tracker account used across tests.
pub fn tracker_user(account_id: &str, display_name: &str) -> TrackerUser {
    TrackerUser {
        self_url: format!("{JIRA_URL}/rest/api/2/user?accountId={account_id}"),
        account_id: Some(account_id.to_string()),
        display_name: display_name.to_string(),
        ..Default::default()
    }
}

pub fn issue(key: &str, project: &str) -> Issue {
    Issue {
        id: "10042".to_string(),
        key: key.to_string(),
        self_url: format!("{JIRA_URL}/rest/api/2/issue/10042"),
        fields: Some(IssueFields {
            summary: "Broken login".to_string(),
            project: Some(Project {
                id: "1".to_string(),
                key: project.to_string(),
                name: "Project".to_string(),
                ..Default::default()
            }),
            issue_type: Some(IssueType {
                id: "10001".to_string(),
                name: "Task".to_string(),
                subtask: false,
            }),
            status: Some(Status {
                id: "1".to_string(),
                name: "To Do".to_string(),
            }),
            ..Default::default()
        }),
    }
}

pub fn transition(id: &str, to: &str) -> Transition {
    Transition {
        id: id.to_string(),
        name: format!("Move to {to}"),
        to: Status {
            id: id.to_string(),
            name: to.to_string(),
        },
    }
}

/// Mutable tracker state behind every fake client, plus a log of writes.
#[derive(Debug, Default)]
pub struct TrackerState {
    pub issues: HashMap<String, Issue>,
    pub transitions: Vec<Transition>,
    pub resolutions: Vec<Resolution>,
    pub assignable: Vec<TrackerUser>,
    pub projects: Vec<Project>,
    /// Account returned by `get_myself`, keyed by access token.
    pub accounts: HashMap<String, TrackerUser>,
    /// Access tokens the tracker refuses for reads.
    pub denied_tokens: HashSet<String>,
    /// Tokens whose requests fail with a 500.
    pub failing_tokens: HashSet<String>,
    pub next_comment_id: u64,
    pub comments: Vec<(String, Comment)>,
    pub updated_comments: Vec<(String, String, String)>,
    pub transitioned: Vec<(String, String, Option<String>)>,
    pub assigned: Vec<(String, Option<TrackerUser>)>,
    pub attachments: Vec<(String, String, usize)>,
    /// Tokens each `get_issue` was called with.
    pub issue_reads: Vec<String>,
    /// Watchers keyed by issue key.
    pub watchers: HashMap<String, Vec<TrackerUser>>,
    /// Tokens each `get_watchers` was called with.
    pub watcher_reads: Vec<String>,
    /// `fields` objects passed to `create_issue`.
    pub created: Vec<Value>,
    /// Error returned by the next `create_issue`.
    pub create_failure: Option<TrackerError>,
    pub searches: Vec<(String, Vec<String>, u32)>,
    pub create_meta: Value,
    /// Field ids reported as editable on every issue.
    pub editable_fields: Vec<String>,
    /// Issue keys the caller may log work on.
    pub worklog_allowed: HashSet<String>,
    pub worklogs: Vec<(String, u64, String)>,
}

/// Hands out [`FakeTrackerClient`]s keyed by access token; the bot client
/// uses the instance's bot token.
#[derive(Debug, Clone, Default)]
pub struct FakeTracker {
    pub state: Arc<Mutex<TrackerState>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, TrackerState> {
        lock(&self.state)
    }

    pub fn with_issue(self, issue: Issue) -> Self {
        self.state().issues.insert(issue.key.clone(), issue);
        self
    }

    pub fn deny(&self, token: &str) {
        self.state().denied_tokens.insert(token.to_string());
    }

    pub fn fail(&self, token: &str) {
        self.state().failing_tokens.insert(token.to_string());
    }
}

impl TrackerClientFactory for FakeTracker {
    fn client_for(
        &self,
        instance: &Instance,
        connection: Option<&Connection>,
    ) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        let token = match connection {
            Some(connection) => connection.access_token.clone(),
            None => instance.bot_token.clone().ok_or_else(|| {
                TrackerError::MissingCredentials("instance has no bot token".to_string())
            })?,
        };
        Ok(Arc::new(FakeTrackerClient {
            token,
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeTrackerClient {
    token: String,
    state: Arc<Mutex<TrackerState>>,
}

impl FakeTrackerClient {
    fn guard(&self) -> Result<MutexGuard<'_, TrackerState>, TrackerError> {
        let state = lock(&self.state);
        if state.failing_tokens.contains(&self.token) {
            return Err(TrackerError::Http {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        if state.denied_tokens.contains(&self.token) {
            return Err(TrackerError::Forbidden("denied".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl TrackerClient for FakeTrackerClient {
    async fn get_issue(&self, issue_key: &str) -> Result<Issue, TrackerError> {
        lock(&self.state).issue_reads.push(self.token.clone());
        let state = self.guard()?;
        state
            .issues
            .get(issue_key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(issue_key.to_string()))
    }

    async fn get_transitions(&self, issue_key: &str) -> Result<Vec<Transition>, TrackerError> {
        let state = self.guard()?;
        if !state.issues.contains_key(issue_key) {
            return Err(TrackerError::NotFound(issue_key.to_string()));
        }
        Ok(state.transitions.clone())
    }

    async fn do_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
        resolution: Option<&str>,
    ) -> Result<(), TrackerError> {
        let mut state = self.guard()?;
        state.transitioned.push((
            issue_key.to_string(),
            transition_id.to_string(),
            resolution.map(str::to_string),
        ));
        Ok(())
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<Comment, TrackerError> {
        let mut state = self.guard()?;
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id.to_string(),
            body: body.to_string(),
            ..Default::default()
        };
        state.comments.push((issue_key.to_string(), comment.clone()));
        Ok(comment)
    }

    async fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, TrackerError> {
        let mut state = self.guard()?;
        state.updated_comments.push((
            issue_key.to_string(),
            comment_id.to_string(),
            body.to_string(),
        ));
        Ok(Comment {
            id: comment_id.to_string(),
            body: body.to_string(),
            ..Default::default()
        })
    }

    async fn update_assignee(
        &self,
        issue_key: &str,
        assignee: Option<&TrackerUser>,
    ) -> Result<(), TrackerError> {
        let mut state = self.guard()?;
        state
            .assigned
            .push((issue_key.to_string(), assignee.cloned()));
        Ok(())
    }

    async fn search_users_assignable_to_issue(
        &self,
        _issue_key: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<TrackerUser>, TrackerError> {
        let state = self.guard()?;
        let needle = query.to_lowercase();
        Ok(state
            .assignable
            .iter()
            .filter(|u| u.display_name.to_lowercase().contains(&needle))
            .take(max_results as usize)
            .cloned()
            .collect())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        let state = self.guard()?;
        Ok(state.projects.clone())
    }

    async fn get_project(&self, project_key: &str) -> Result<Project, TrackerError> {
        let state = self.guard()?;
        state
            .projects
            .iter()
            .find(|p| p.key == project_key)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(project_key.to_string()))
    }

    async fn get_watchers(&self, issue_key: &str) -> Result<Vec<TrackerUser>, TrackerError> {
        lock(&self.state).watcher_reads.push(self.token.clone());
        let state = self.guard()?;
        Ok(state.watchers.get(issue_key).cloned().unwrap_or_default())
    }

    async fn create_issue(&self, fields: &Value) -> Result<CreatedIssue, TrackerError> {
        let mut state = self.guard()?;
        if let Some(err) = state.create_failure.take() {
            return Err(err);
        }
        state.created.push(fields.clone());

        let project = fields["project"]["key"].as_str().unwrap_or("PROJ").to_string();
        let key = format!("{project}-{}", 100 + state.created.len());
        let mut created = issue(&key, &project);
        if let Some(created_fields) = created.fields.as_mut() {
            created_fields.summary = fields["summary"].as_str().unwrap_or_default().to_string();
        }
        created.id = format!("{}", 20000 + state.created.len());
        state.issues.insert(key.clone(), created.clone());
        Ok(CreatedIssue {
            id: created.id,
            key,
            self_url: created.self_url,
        })
    }

    async fn search_issues(
        &self,
        jql: &str,
        fields: &[String],
        max_results: u32,
    ) -> Result<Vec<Issue>, TrackerError> {
        let mut state = self.guard()?;
        state
            .searches
            .push((jql.to_string(), fields.to_vec(), max_results));
        let mut found: Vec<Issue> = state.issues.values().cloned().collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found.truncate(max_results as usize);
        Ok(found)
    }

    async fn get_create_meta(&self, _project_keys: &str) -> Result<Value, TrackerError> {
        let state = self.guard()?;
        Ok(state.create_meta.clone())
    }

    async fn get_edit_meta(&self, issue_key: &str) -> Result<Map<String, Value>, TrackerError> {
        let state = self.guard()?;
        if !state.issues.contains_key(issue_key) {
            return Err(TrackerError::NotFound(issue_key.to_string()));
        }
        Ok(state
            .editable_fields
            .iter()
            .map(|field| (field.clone(), json!({ "required": false })))
            .collect())
    }

    async fn has_worklog_permission(&self, issue_key: &str) -> Result<bool, TrackerError> {
        let state = self.guard()?;
        if !state.issues.contains_key(issue_key) {
            return Err(TrackerError::NotFound(issue_key.to_string()));
        }
        Ok(state.worklog_allowed.contains(issue_key))
    }

    async fn add_worklog(
        &self,
        issue_key: &str,
        time_spent_seconds: u64,
        comment: &str,
    ) -> Result<Worklog, TrackerError> {
        let mut state = self.guard()?;
        if !state.worklog_allowed.contains(issue_key) {
            return Err(TrackerError::Forbidden(format!("cannot log work on {issue_key}")));
        }
        state
            .worklogs
            .push((issue_key.to_string(), time_spent_seconds, comment.to_string()));
        Ok(Worklog {
            id: state.worklogs.len().to_string(),
            issue_id: issue_key.to_string(),
            time_spent_seconds,
            comment: Some(comment.to_string()),
            author: state.accounts.get(&self.token).cloned(),
        })
    }

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Vec<Attachment>, TrackerError> {
        let mut state = self.guard()?;
        state
            .attachments
            .push((issue_key.to_string(), file_name.to_string(), data.len()));
        Ok(vec![Attachment {
            id: format!("att-{}", state.attachments.len()),
            filename: file_name.to_string(),
            mime_type: mime_type.to_string(),
            ..Default::default()
        }])
    }

    async fn get_resolutions(&self) -> Result<Vec<Resolution>, TrackerError> {
        let state = self.guard()?;
        Ok(state.resolutions.clone())
    }

    async fn get_user(&self, account: &str) -> Result<TrackerUser, TrackerError> {
        let state = self.guard()?;
        state
            .accounts
            .values()
            .find(|u| u.account_ref() == Some(account))
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(account.to_string()))
    }

    async fn get_myself(&self) -> Result<TrackerUser, TrackerError> {
        let state = lock(&self.state);
        if state.failing_tokens.contains(&self.token) {
            return Err(TrackerError::Http {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        state
            .accounts
            .get(&self.token)
            .cloned()
            .ok_or(TrackerError::Unauthorized)
    }
}

/// Everything the chat fake was asked to do.
#[derive(Debug, Default)]
pub struct ChatRecord {
    pub posts: Vec<Post>,
    pub ephemeral: Vec<(String, Post)>,
    pub deleted_ephemeral: Vec<(String, String)>,
    pub direct_messages: Vec<(String, String)>,
    /// Posts returned by `get_post`, keyed by id.
    pub known_posts: HashMap<String, Post>,
    pub users: HashMap<String, ChatUser>,
    pub files: HashMap<String, (FileInfo, Vec<u8>)>,
    /// Channels where `create_post` fails.
    pub failing_channels: HashSet<String>,
    /// Every `send_direct_message` fails while set.
    pub failing_direct_messages: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingChat {
    pub record: Arc<Mutex<ChatRecord>>,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> MutexGuard<'_, ChatRecord> {
        lock(&self.record)
    }

    pub fn channel_posts(&self, channel_id: &str) -> Vec<Post> {
        self.record()
            .posts
            .iter()
            .filter(|p| p.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn add_user(&self, id: &str, username: &str) {
        self.record().users.insert(
            id.to_string(),
            ChatUser {
                id: id.to_string(),
                username: username.to_string(),
            },
        );
    }
}

fn not_found(what: &str) -> ChatError {
    ChatError::Http {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl ChatSink for RecordingChat {
    fn bot_user_id(&self) -> &str {
        BOT_USER_ID
    }

    async fn create_post(&self, mut post: Post) -> Result<Post, ChatError> {
        let mut record = self.record();
        if record.failing_channels.contains(&post.channel_id) {
            return Err(ChatError::Http {
                status: 500,
                message: "channel unavailable".to_string(),
            });
        }
        post.id = format!("post-{}", record.posts.len() + 1);
        record.posts.push(post.clone());
        Ok(post)
    }

    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> Result<(), ChatError> {
        self.record().ephemeral.push((user_id.to_string(), post));
        Ok(())
    }

    async fn delete_ephemeral_post(&self, user_id: &str, post_id: &str) -> Result<(), ChatError> {
        self.record()
            .deleted_ephemeral
            .push((user_id.to_string(), post_id.to_string()));
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, ChatError> {
        self.record()
            .known_posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| not_found("post"))
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError> {
        self.record()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| not_found("user"))
    }

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo, ChatError> {
        self.record()
            .files
            .get(file_id)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| not_found("file"))
    }

    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>, ChatError> {
        self.record()
            .files
            .get(file_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| not_found("file"))
    }

    async fn send_direct_message(&self, user_id: &str, message: &str) -> Result<Post, ChatError> {
        let mut record = self.record();
        if record.failing_direct_messages {
            return Err(ChatError::Http {
                status: 503,
                message: "direct channel unavailable".to_string(),
            });
        }
        record
            .direct_messages
            .push((user_id.to_string(), message.to_string()));
        Ok(Post::new(BOT_USER_ID, format!("dm-{user_id}"), message))
    }
}

fn store_down() -> RepositoryError {
    RepositoryError::Unavailable("store offline".to_string())
}

/// Subscription store whose every call fails.
#[derive(Debug, Default)]
pub struct UnavailableSubscriptionStore;

#[async_trait]
impl SubscriptionStore for UnavailableSubscriptionStore {
    async fn list_for_instance(
        &self,
        _instance_id: &InstanceId,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError> {
        Err(store_down())
    }

    async fn list_for_channel(
        &self,
        _instance_id: &InstanceId,
        _channel_id: &str,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError> {
        Err(store_down())
    }

    async fn create(
        &self,
        _subscription: ChannelSubscription,
    ) -> Result<ChannelSubscription, RepositoryError> {
        Err(store_down())
    }

    async fn edit(&self, _subscription: ChannelSubscription) -> Result<(), RepositoryError> {
        Err(store_down())
    }

    async fn delete(&self, _instance_id: &InstanceId, _id: &str) -> Result<(), RepositoryError> {
        Err(store_down())
    }
}

/// Connection store that cannot map tracker accounts back to chat users but
/// serves everything else from `inner`.
pub struct ReverseLookupFailingStore {
    pub inner: Arc<InMemoryConnectionStore>,
}

#[async_trait]
impl ConnectionStore for ReverseLookupFailingStore {
    async fn load_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<Connection, RepositoryError> {
        self.inner.load_connection(instance_id, mattermost_user_id).await
    }

    async fn store_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
        connection: Connection,
    ) -> Result<(), RepositoryError> {
        self.inner
            .store_connection(instance_id, mattermost_user_id, connection)
            .await
    }

    async fn delete_connection(
        &self,
        instance_id: &InstanceId,
        mattermost_user_id: &str,
    ) -> Result<(), RepositoryError> {
        self.inner.delete_connection(instance_id, mattermost_user_id).await
    }

    async fn load_chat_user_id(
        &self,
        _instance_id: &InstanceId,
        _tracker_user: &TrackerUser,
    ) -> Result<String, RepositoryError> {
        Err(store_down())
    }
}

/// Stores, fakes and the installed instance wired together.
pub struct Harness {
    pub ctx: ServiceContext,
    pub instance: Instance,
    pub tracker: FakeTracker,
    pub chat: RecordingChat,
    pub connections: Arc<InMemoryConnectionStore>,
    pub subscriptions: Arc<InMemorySubscriptionStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_tracker(FakeTracker::new()).await
    }

    pub async fn with_tracker(tracker: FakeTracker) -> Self {
        let mut instance = Instance::new(JIRA_URL, InstanceType::Cloud);
        instance.bot_token = Some(BOT_TOKEN.to_string());

        let instances = Arc::new(InMemoryInstanceStore::new());
        instances
            .store_instance(instance.clone())
            .await
            .expect("store instance");
        let connections = Arc::new(InMemoryConnectionStore::new());
        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let chat = RecordingChat::new();

        let ctx = ServiceContext {
            instances,
            connections: connections.clone(),
            subscriptions: subscriptions.clone(),
            trackers: Arc::new(tracker.clone()),
            chat: Arc::new(chat.clone()),
        };
        Self {
            ctx,
            instance,
            tracker,
            chat,
            connections,
            subscriptions,
        }
    }

    /// Connects `mattermost_user_id` to `account` using `token`.
    pub async fn connect(&self, mattermost_user_id: &str, account: &TrackerUser, token: &str) {
        self.tracker
            .state()
            .accounts
            .insert(token.to_string(), account.clone());
        self.connections
            .store_connection(
                &self.instance.id,
                mattermost_user_id,
                Connection::from_tracker_user(account, token),
            )
            .await
            .expect("store connection");
    }

    pub async fn set_connection(&self, mattermost_user_id: &str, connection: Connection) {
        self.connections
            .store_connection(&self.instance.id, mattermost_user_id, connection)
            .await
            .expect("store connection");
    }
}

pub fn subscription(
    instance: &Instance,
    id: &str,
    channel_id: &str,
    creator: &str,
    events: &[&str],
    projects: &[&str],
) -> ChannelSubscription {
    ChannelSubscription {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        instance_id: instance.id.clone(),
        mattermost_user_id: creator.to_string(),
        name: format!("{id} subscription"),
        filters: SubscriptionFilters {
            events: events.iter().map(|e| e.to_string()).collect(),
            projects: projects.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
    }
}

/// `jira:issue_created` payload for `key` in project `PROJ`.
pub fn issue_created_payload(key: &str, actor: &TrackerUser) -> Vec<u8> {
    json!({
        "webhookEvent": "jira:issue_created",
        "timestamp": 1_700_000_000_000i64,
        "user": user_json(actor),
        "issue": issue_json(key),
    })
    .to_string()
    .into_bytes()
}

pub fn issue_json(key: &str) -> Value {
    serde_json::to_value(issue(key, "PROJ")).unwrap_or(Value::Null)
}

pub fn user_json(user: &TrackerUser) -> Value {
    json!({
        "self": user.self_url,
        "accountId": user.account_id,
        "displayName": user.display_name,
    })
}
