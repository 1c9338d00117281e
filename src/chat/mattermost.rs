//! Mattermost REST v4 implementation of [`ChatSink`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ChatError, ChatSink};
use crate::models::{ChatUser, FileInfo, Post};

#[derive(Debug, Clone)]
pub struct MattermostClient {
    http: reqwest::Client,
    server_url: String,
    bot_token: String,
    bot_user_id: String,
}

impl MattermostClient {
    pub fn new(
        server_url: impl Into<String>,
        bot_token: impl Into<String>,
        bot_user_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Ok(Self::with_client(http, server_url, bot_token, bot_user_id))
    }

    pub fn with_client(
        http: reqwest::Client,
        server_url: impl Into<String>,
        bot_token: impl Into<String>,
        bot_user_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            bot_user_id: bot_user_id.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/v4{}", self.server_url, path))
            .bearer_auth(&self.bot_token)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ChatError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        #[derive(Deserialize)]
        struct AppError {
            #[serde(default)]
            message: String,
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AppError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        debug!(status = %status, message = %message, "Chat request failed");
        Err(ChatError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ChatError> {
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatSink for MattermostClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn create_post(&self, post: Post) -> Result<Post, ChatError> {
        self.send_json(self.request(Method::POST, "/posts").json(&post))
            .await
    }

    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> Result<(), ChatError> {
        self.send(
            self.request(Method::POST, "/posts/ephemeral")
                .json(&json!({ "user_id": user_id, "post": post })),
        )
        .await?;
        Ok(())
    }

    async fn delete_ephemeral_post(&self, _user_id: &str, post_id: &str) -> Result<(), ChatError> {
        self.send(self.request(Method::DELETE, &format!("/posts/{post_id}")))
            .await?;
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, ChatError> {
        self.send_json(self.request(Method::GET, &format!("/posts/{post_id}")))
            .await
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError> {
        self.send_json(self.request(Method::GET, &format!("/users/{user_id}")))
            .await
    }

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo, ChatError> {
        self.send_json(self.request(Method::GET, &format!("/files/{file_id}/info")))
            .await
    }

    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>, ChatError> {
        let resp = self
            .send(self.request(Method::GET, &format!("/files/{file_id}")))
            .await?;
        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn send_direct_message(&self, user_id: &str, message: &str) -> Result<Post, ChatError> {
        #[derive(Deserialize)]
        struct Channel {
            id: String,
        }

        let channel: Channel = self
            .send_json(
                self.request(Method::POST, "/channels/direct")
                    .json(&[self.bot_user_id.as_str(), user_id]),
            )
            .await?;

        self.create_post(Post::new(&self.bot_user_id, channel.id, message))
            .await
    }
}
