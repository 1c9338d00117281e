//! Jira REST v2 client
//!
//! Talks to Jira Cloud and Jira Server with bearer credentials. The two
//! deployments differ in how accounts are addressed: cloud uses `accountId`,
//! server uses `username`/`name`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, multipart};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{TrackerClient, TrackerClientFactory, TrackerError};
use crate::models::issue::{Attachment, CreatedIssue, Project, Resolution, Worklog};
use crate::models::{
    Comment, Connection, Instance, InstanceType, Issue, TrackerUser, Transition,
};

const API_PREFIX: &str = "/rest/api/2";
const WORKLOG_PERMISSION: &str = "WORK_ON_ISSUES";

/// Jira client bound to one instance and one credential.
#[derive(Debug, Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    instance_type: InstanceType,
}

impl JiraClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        instance_type: InstanceType,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            instance_type,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TrackerError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let body = resp.text().await.unwrap_or_default();
        debug!(status = %status, "Jira request failed");
        Err(TrackerError::from_status(status, retry_after, body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, TrackerError> {
        let resp = self.send(builder).await?;
        resp.json::<T>()
            .await
            .map_err(|e| TrackerError::Decode(e.to_string()))
    }

    fn account_param(&self) -> &'static str {
        match self.instance_type {
            InstanceType::Cloud => "accountId",
            InstanceType::Server => "username",
        }
    }

    fn assignee_body(&self, assignee: Option<&TrackerUser>) -> Value {
        match self.instance_type {
            // Jira rejects requests carrying both accountId and name.
            InstanceType::Cloud => json!({ "accountId": assignee.and_then(|u| u.account_id.clone()) }),
            InstanceType::Server => json!({ "name": assignee.and_then(|u| u.name.clone()) }),
        }
    }
}

#[async_trait]
impl TrackerClient for JiraClient {
    async fn get_issue(&self, issue_key: &str) -> Result<Issue, TrackerError> {
        self.send_json(self.request(Method::GET, &format!("/issue/{issue_key}")))
            .await
    }

    async fn get_transitions(&self, issue_key: &str) -> Result<Vec<Transition>, TrackerError> {
        #[derive(serde::Deserialize)]
        struct Transitions {
            #[serde(default)]
            transitions: Vec<Transition>,
        }

        let body: Transitions = self
            .send_json(self.request(Method::GET, &format!("/issue/{issue_key}/transitions")))
            .await?;
        Ok(body.transitions)
    }

    async fn do_transition(
        &self,
        issue_key: &str,
        transition_id: &str,
        resolution: Option<&str>,
    ) -> Result<(), TrackerError> {
        let mut payload = json!({ "transition": { "id": transition_id } });
        if let Some(name) = resolution.filter(|r| !r.is_empty()) {
            payload["fields"] = json!({ "resolution": { "name": name } });
        }
        self.send(
            self.request(Method::POST, &format!("/issue/{issue_key}/transitions"))
                .json(&payload),
        )
        .await?;
        Ok(())
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<Comment, TrackerError> {
        self.send_json(
            self.request(Method::POST, &format!("/issue/{issue_key}/comment"))
                .json(&json!({ "body": body })),
        )
        .await
    }

    async fn update_comment(
        &self,
        issue_key: &str,
        comment_id: &str,
        body: &str,
    ) -> Result<Comment, TrackerError> {
        self.send_json(
            self.request(
                Method::PUT,
                &format!("/issue/{issue_key}/comment/{comment_id}"),
            )
            .json(&json!({ "body": body })),
        )
        .await
    }

    async fn update_assignee(
        &self,
        issue_key: &str,
        assignee: Option<&TrackerUser>,
    ) -> Result<(), TrackerError> {
        self.send(
            self.request(Method::PUT, &format!("/issue/{issue_key}/assignee"))
                .json(&self.assignee_body(assignee)),
        )
        .await?;
        Ok(())
    }

    async fn search_users_assignable_to_issue(
        &self,
        issue_key: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<TrackerUser>, TrackerError> {
        let query_param = match self.instance_type {
            InstanceType::Cloud => "query",
            InstanceType::Server => "username",
        };
        let max_results = max_results.to_string();
        self.send_json(
            self.request(Method::GET, "/user/assignable/search").query(&[
                ("issueKey", issue_key),
                (query_param, query),
                ("maxResults", max_results.as_str()),
            ]),
        )
        .await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        self.send_json(
            self.request(Method::GET, "/project")
                .query(&[("expand", "issueTypes")]),
        )
        .await
    }

    async fn get_project(&self, project_key: &str) -> Result<Project, TrackerError> {
        self.send_json(self.request(Method::GET, &format!("/project/{project_key}")))
            .await
    }

    async fn get_watchers(&self, issue_key: &str) -> Result<Vec<TrackerUser>, TrackerError> {
        #[derive(serde::Deserialize)]
        struct Watchers {
            #[serde(default)]
            watchers: Vec<TrackerUser>,
        }

        let body: Watchers = self
            .send_json(self.request(Method::GET, &format!("/issue/{issue_key}/watchers")))
            .await?;
        Ok(body.watchers)
    }

    async fn create_issue(&self, fields: &Value) -> Result<CreatedIssue, TrackerError> {
        self.send_json(
            self.request(Method::POST, "/issue")
                .json(&json!({ "fields": fields })),
        )
        .await
    }

    async fn search_issues(
        &self,
        jql: &str,
        fields: &[String],
        max_results: u32,
    ) -> Result<Vec<Issue>, TrackerError> {
        #[derive(serde::Deserialize)]
        struct SearchResult {
            #[serde(default)]
            issues: Vec<Issue>,
        }

        let body: SearchResult = self
            .send_json(self.request(Method::POST, "/search").json(&json!({
                "jql": jql,
                "fields": fields,
                "maxResults": max_results,
            })))
            .await?;
        Ok(body.issues)
    }

    async fn get_create_meta(&self, project_keys: &str) -> Result<Value, TrackerError> {
        self.send_json(self.request(Method::GET, "/issue/createmeta").query(&[
            ("projectKeys", project_keys),
            ("expand", "projects.issuetypes.fields"),
        ]))
        .await
    }

    async fn get_edit_meta(&self, issue_key: &str) -> Result<Map<String, Value>, TrackerError> {
        #[derive(serde::Deserialize)]
        struct EditMeta {
            #[serde(default)]
            fields: Map<String, Value>,
        }

        let body: EditMeta = self
            .send_json(self.request(Method::GET, &format!("/issue/{issue_key}/editmeta")))
            .await?;
        Ok(body.fields)
    }

    async fn has_worklog_permission(&self, issue_key: &str) -> Result<bool, TrackerError> {
        let body: Value = self
            .send_json(self.request(Method::GET, "/mypermissions").query(&[
                ("issueKey", issue_key),
                ("permissions", WORKLOG_PERMISSION),
            ]))
            .await?;
        Ok(body["permissions"][WORKLOG_PERMISSION]["havePermission"]
            .as_bool()
            .unwrap_or(false))
    }

    async fn add_worklog(
        &self,
        issue_key: &str,
        time_spent_seconds: u64,
        comment: &str,
    ) -> Result<Worklog, TrackerError> {
        self.send_json(
            self.request(Method::POST, &format!("/issue/{issue_key}/worklog"))
                .json(&json!({
                    "timeSpentSeconds": time_spent_seconds,
                    "comment": comment,
                })),
        )
        .await
    }

    async fn add_attachment(
        &self,
        issue_key: &str,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Vec<Attachment>, TrackerError> {
        let part = multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| TrackerError::Decode(format!("invalid mime type: {e}")))?;
        let form = multipart::Form::new().part("file", part);

        self.send_json(
            self.request(Method::POST, &format!("/issue/{issue_key}/attachments"))
                .header("X-Atlassian-Token", "no-check")
                .multipart(form),
        )
        .await
    }

    async fn get_resolutions(&self) -> Result<Vec<Resolution>, TrackerError> {
        self.send_json(self.request(Method::GET, "/resolution")).await
    }

    async fn get_user(&self, account: &str) -> Result<TrackerUser, TrackerError> {
        self.send_json(
            self.request(Method::GET, "/user")
                .query(&[(self.account_param(), account)]),
        )
        .await
    }

    async fn get_myself(&self) -> Result<TrackerUser, TrackerError> {
        self.send_json(self.request(Method::GET, "/myself")).await
    }
}

/// Builds [`JiraClient`]s sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct JiraClientFactory {
    http: reqwest::Client,
}

impl JiraClientFactory {
    pub fn new() -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl TrackerClientFactory for JiraClientFactory {
    fn client_for(
        &self,
        instance: &Instance,
        connection: Option<&Connection>,
    ) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        let token = match connection {
            Some(conn) if !conn.access_token.is_empty() => conn.access_token.clone(),
            Some(_) => {
                return Err(TrackerError::MissingCredentials(format!(
                    "connection on {} has no access token",
                    instance.id
                )));
            }
            None => instance
                .bot_token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    TrackerError::MissingCredentials(format!(
                        "instance {} has no bot token",
                        instance.id
                    ))
                })?,
        };

        Ok(Arc::new(JiraClient::new(
            self.http.clone(),
            instance.jira_base_url(),
            token,
            instance.instance_type,
        )))
    }
}
