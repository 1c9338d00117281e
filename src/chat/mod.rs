//! # Chat Sink
//!
//! Outbound interface to the chat server: posts, ephemeral posts, direct
//! messages and the lookups the issue services need.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChatUser, FileInfo, Post};

pub mod mattermost;

pub use mattermost::MattermostClient;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat server returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("chat server unreachable: {0}")]
    Transport(String),
    #[error("unexpected chat server response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::Decode(err.to_string())
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait ChatSink: Send + Sync {
    /// User id of the bot account posts are made as.
    fn bot_user_id(&self) -> &str;

    async fn create_post(&self, post: Post) -> Result<Post, ChatError>;

    async fn send_ephemeral_post(&self, user_id: &str, post: Post) -> Result<(), ChatError>;

    async fn delete_ephemeral_post(&self, user_id: &str, post_id: &str) -> Result<(), ChatError>;

    async fn get_post(&self, post_id: &str) -> Result<Post, ChatError>;

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError>;

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo, ChatError>;

    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>, ChatError>;

    /// Posts `message` in the direct channel between the bot and `user_id`.
    async fn send_direct_message(&self, user_id: &str, message: &str) -> Result<Post, ChatError>;
}
