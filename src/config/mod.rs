//! Configuration loading for the Jira bridge.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `JIRA_BRIDGE_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::instance::InstanceType;

const ENV_PREFIX: &str = "JIRA_BRIDGE_";

/// Application configuration derived from `JIRA_BRIDGE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Shared secret expected in the `secret` query parameter of inbound webhooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_webhook_max_body_kb")]
    pub webhook_max_body_kb: usize,
    /// Upper bound for files copied from chat posts into tracker attachments.
    #[serde(default = "default_max_attachment_size_bytes")]
    pub max_attachment_size_bytes: u64,
    #[serde(default)]
    pub webhook_workers: WebhookWorkerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Tracker instance registered at startup, when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceSeedConfig>,
    /// Chat user ids of bots allowed to call the bot API on behalf of other users.
    #[serde(default)]
    pub backdoor_bots: Vec<String>,
}

/// Sizing of the webhook worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WebhookWorkerConfig {
    /// Number of concurrent workers draining the queue (default: 20)
    #[serde(default = "default_webhook_worker_count")]
    pub worker_count: usize,
    /// Bounded queue capacity; producers are rejected when full (default: 10000)
    #[serde(default = "default_webhook_queue_size")]
    pub queue_size: usize,
}

/// Chat server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ChatConfig {
    #[serde(default = "default_chat_server_url")]
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub bot_user_id: String,
    /// Public site URL used to build post permalinks.
    #[serde(default = "default_chat_server_url")]
    pub site_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct InstanceSeedConfig {
    pub url: String,
    #[serde(default)]
    pub instance_type: InstanceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            webhook_secret: None,
            webhook_max_body_kb: default_webhook_max_body_kb(),
            max_attachment_size_bytes: default_max_attachment_size_bytes(),
            webhook_workers: WebhookWorkerConfig::default(),
            chat: ChatConfig::default(),
            instance: None,
            backdoor_bots: Vec::new(),
        }
    }
}

impl Default for WebhookWorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_webhook_worker_count(),
            queue_size: default_webhook_queue_size(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server_url: default_chat_server_url(),
            bot_token: None,
            bot_user_id: String::new(),
            site_url: default_chat_server_url(),
        }
    }
}

impl WebhookWorkerConfig {
    /// Validate pool sizing bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 || self.worker_count > 256 {
            return Err(ConfigError::InvalidWorkerCount {
                value: self.worker_count,
            });
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize {
                value: self.queue_size,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Maximum accepted webhook body in bytes.
    pub fn webhook_max_body_bytes(&self) -> usize {
        self.webhook_max_body_kb.saturating_mul(1024)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.webhook_secret.is_some() {
            config.webhook_secret = Some("[REDACTED]".to_string());
        }
        if config.chat.bot_token.is_some() {
            config.chat.bot_token = Some("[REDACTED]".to_string());
        }
        if let Some(instance) = config.instance.as_mut()
            && instance.bot_token.is_some()
        {
            instance.bot_token = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let relaxed = matches!(self.profile.as_str(), "local" | "test");

        if !relaxed {
            if self.webhook_secret.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingWebhookSecret);
            }
            if self.chat.bot_token.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingChatBotToken);
            }
            if self.chat.bot_user_id.is_empty() {
                return Err(ConfigError::MissingChatBotUserId);
            }
        }

        if let Err(source) = url::Url::parse(&self.chat.server_url) {
            return Err(ConfigError::InvalidUrl {
                field: "CHAT_SERVER_URL".to_string(),
                value: self.chat.server_url.clone(),
                source,
            });
        }

        if let Some(instance) = &self.instance
            && let Err(source) = url::Url::parse(&instance.url)
        {
            return Err(ConfigError::InvalidUrl {
                field: "INSTANCE_URL".to_string(),
                value: instance.url.clone(),
                source,
            });
        }

        if self.webhook_max_body_kb == 0 {
            return Err(ConfigError::InvalidWebhookBodyLimit {
                value: self.webhook_max_body_kb,
            });
        }

        self.webhook_workers.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_webhook_max_body_kb() -> usize {
    1024
}

fn default_max_attachment_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_webhook_worker_count() -> usize {
    20
}

fn default_webhook_queue_size() -> usize {
    10_000
}

fn default_chat_server_url() -> String {
    "http://localhost:8065".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("webhook secret is missing; set JIRA_BRIDGE_WEBHOOK_SECRET")]
    MissingWebhookSecret,
    #[error("chat bot token is missing; set JIRA_BRIDGE_CHAT_BOT_TOKEN")]
    MissingChatBotToken,
    #[error("chat bot user id is missing; set JIRA_BRIDGE_CHAT_BOT_USER_ID")]
    MissingChatBotUserId,
    #[error("invalid {field} '{value}': {source}")]
    InvalidUrl {
        field: String,
        value: String,
        source: url::ParseError,
    },
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },
    #[error("webhook worker count must be between 1 and 256, got {value}")]
    InvalidWorkerCount { value: usize },
    #[error("webhook queue size must be positive, got {value}")]
    InvalidQueueSize { value: usize },
    #[error("webhook max body size must be positive, got {value} KiB")]
    InvalidWebhookBodyLimit { value: usize },
}

/// Loads configuration using layered `.env` files and `JIRA_BRIDGE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads `.env`, `.env.local`, `.env.<profile>`, `.env.<profile>.local`, then the
    /// process environment, later layers overriding earlier ones.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level =
            take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let webhook_secret = take_non_empty(&mut layered, "WEBHOOK_SECRET");
        let webhook_max_body_kb = take_parsed(&mut layered, "WEBHOOK_MAX_BODY_KB")?
            .unwrap_or_else(default_webhook_max_body_kb);
        let max_attachment_size_bytes = take_parsed(&mut layered, "MAX_ATTACHMENT_SIZE_BYTES")?
            .unwrap_or_else(default_max_attachment_size_bytes);

        let webhook_workers = WebhookWorkerConfig {
            worker_count: take_parsed(&mut layered, "WEBHOOK_WORKER_COUNT")?
                .unwrap_or_else(default_webhook_worker_count),
            queue_size: take_parsed(&mut layered, "WEBHOOK_QUEUE_SIZE")?
                .unwrap_or_else(default_webhook_queue_size),
        };

        let server_url =
            take_non_empty(&mut layered, "CHAT_SERVER_URL").unwrap_or_else(default_chat_server_url);
        let chat = ChatConfig {
            site_url: take_non_empty(&mut layered, "CHAT_SITE_URL")
                .unwrap_or_else(|| server_url.clone()),
            server_url,
            bot_token: take_non_empty(&mut layered, "CHAT_BOT_TOKEN"),
            bot_user_id: take_non_empty(&mut layered, "CHAT_BOT_USER_ID").unwrap_or_default(),
        };

        let instance = match take_non_empty(&mut layered, "INSTANCE_URL") {
            Some(url) => {
                let instance_type = match take_non_empty(&mut layered, "INSTANCE_TYPE") {
                    Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                        field: "INSTANCE_TYPE".to_string(),
                        value: raw,
                    })?,
                    None => InstanceType::default(),
                };
                Some(InstanceSeedConfig {
                    url,
                    instance_type,
                    alias: take_non_empty(&mut layered, "INSTANCE_ALIAS"),
                    bot_token: take_non_empty(&mut layered, "INSTANCE_BOT_TOKEN"),
                })
            }
            None => None,
        };

        let backdoor_bots = take_non_empty(&mut layered, "BACKDOOR_BOTS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default();

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            webhook_secret,
            webhook_max_body_kb,
            max_attachment_size_bytes,
            webhook_workers,
            chat,
            instance,
            backdoor_bots,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(self.base_dir.join(format!(".env.{profile}")), &mut values)?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{profile}.local")),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn take_parsed<T: std::str::FromStr>(
    values: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match take_non_empty(values, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}
