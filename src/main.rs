//! # Jira Bridge Entry Point
//!
//! Loads configuration, wires stores and clients, starts the webhook worker
//! pool and serves the HTTP API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use jira_bridge::chat::MattermostClient;
use jira_bridge::config::{AppConfig, ConfigLoader};
use jira_bridge::models::Instance;
use jira_bridge::repositories::{
    InMemoryConnectionStore, InMemoryInstanceStore, InMemorySubscriptionStore, InstanceStore,
};
use jira_bridge::server::{AppState, run_server};
use jira_bridge::services::ServiceContext;
use jira_bridge::telemetry::init_tracing;
use jira_bridge::tracker::JiraClientFactory;
use jira_bridge::webhook::{WebhookPipeline, WorkerPool};

#[derive(Debug, Parser)]
#[command(name = "jira-bridge", version, about = "Jira to Mattermost webhook bridge")]
struct Cli {
    /// Directory holding the layered `.env` files (defaults to the working directory)
    #[arg(long)]
    env_dir: Option<PathBuf>,
}

async fn seed_instance(config: &AppConfig, store: &dyn InstanceStore) -> anyhow::Result<()> {
    let Some(seed) = &config.instance else {
        warn!("No Jira instance configured; webhooks will be rejected until one is installed");
        return Ok(());
    };

    let mut instance = Instance::new(&seed.url, seed.instance_type);
    instance.alias = seed.alias.clone();
    instance.bot_token = seed.bot_token.clone();
    info!(
        instance_id = %instance.id,
        webhook_path = %format!("/instance/{}/webhook", instance.id.encoded()),
        "Installing Jira instance"
    );
    store
        .store_instance(instance)
        .await
        .context("failed to store configured instance")?;
    Ok(())
}

fn shutdown_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => warn!(error = %err, "Failed to listen for shutdown signal"),
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loader = match cli.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = Arc::new(loader.load()?);

    init_tracing(&config)?;
    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Loaded configuration");
    }

    let instances = Arc::new(InMemoryInstanceStore::new());
    seed_instance(&config, instances.as_ref()).await?;

    let chat = MattermostClient::new(
        config.chat.server_url.clone(),
        config.chat.bot_token.clone().unwrap_or_default(),
        config.chat.bot_user_id.clone(),
    )?;
    let ctx = ServiceContext {
        instances,
        connections: Arc::new(InMemoryConnectionStore::new()),
        subscriptions: Arc::new(InMemorySubscriptionStore::new()),
        trackers: Arc::new(JiraClientFactory::new()?),
        chat: Arc::new(chat),
    };

    let pool = WorkerPool::start(
        &config.webhook_workers,
        Arc::new(WebhookPipeline::from_context(&ctx)),
    );
    let state = AppState::new(Arc::clone(&config), ctx, pool.queue());

    let shutdown = CancellationToken::new();
    shutdown_on_signal(shutdown.clone());

    let served = run_server(Arc::clone(&config), state, shutdown).await;

    // Drain queued webhooks before exiting, even when the server failed.
    pool.shutdown().await;
    served
}
