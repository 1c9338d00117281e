//! # Webhook Worker Pool
//!
//! A fixed number of tokio tasks share one bounded queue. Each worker takes the
//! next message, runs the pipeline to completion, and goes back to the queue.
//! Messages are claimed by exactly one worker; there is no ordering guarantee
//! between messages.
//!
//! Every message runs in its own task so that a panic inside the pipeline is
//! reported as a failed message instead of taking the worker down.
//!
//! Shutdown closes the queue, lets the workers drain what was already accepted,
//! and waits for them to exit.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::expand::expand_issue;
use super::formatter::channel_post;
use super::notifications::post_notifications;
use super::parser::parse_webhook;
use super::permissions::check_permissions;
use super::roles::creator_holds_role;
use super::subscriptions::get_channels_subscribed;
use super::{DeliveryReport, IgnoreReason, ProcessOutcome, WebhookError};
use crate::chat::ChatSink;
use crate::config::WebhookWorkerConfig;
use crate::models::InstanceId;
use crate::repositories::{ConnectionStore, InstanceStore, SubscriptionStore};
use crate::services::ServiceContext;
use crate::tracker::TrackerClientFactory;

/// One inbound webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookMessage {
    pub instance_id: InstanceId,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl WebhookMessage {
    pub fn new(instance_id: InstanceId, payload: Vec<u8>) -> Self {
        Self {
            instance_id,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Processes a single message to a final outcome.
#[async_trait]
pub trait WebhookProcessor: Send + Sync {
    async fn process(&self, message: &WebhookMessage) -> ProcessOutcome;
}

/// The production processor: parse, notify, expand, resolve, fan out.
pub struct WebhookPipeline {
    instances: Arc<dyn InstanceStore>,
    connections: Arc<dyn ConnectionStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    trackers: Arc<dyn TrackerClientFactory>,
    chat: Arc<dyn ChatSink>,
}

impl WebhookPipeline {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        connections: Arc<dyn ConnectionStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        trackers: Arc<dyn TrackerClientFactory>,
        chat: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            instances,
            connections,
            subscriptions,
            trackers,
            chat,
        }
    }

    /// Pipeline sharing the stores and clients of the API services.
    pub fn from_context(ctx: &ServiceContext) -> Self {
        Self::new(
            Arc::clone(&ctx.instances),
            Arc::clone(&ctx.connections),
            Arc::clone(&ctx.subscriptions),
            Arc::clone(&ctx.trackers),
            Arc::clone(&ctx.chat),
        )
    }
}

#[async_trait]
impl WebhookProcessor for WebhookPipeline {
    async fn process(&self, message: &WebhookMessage) -> ProcessOutcome {
        let mut webhook = match parse_webhook(&message.payload) {
            Ok(webhook) => webhook,
            Err(WebhookError::UnsupportedEventKind(kind)) => {
                return ProcessOutcome::Ignored(IgnoreReason::UnsupportedEvent(kind));
            }
            Err(err) => return ProcessOutcome::Failed(err),
        };
        if !webhook.has_relevant_changes() {
            return ProcessOutcome::Ignored(IgnoreReason::NoRelevantChanges);
        }

        let mut report = DeliveryReport::default();
        let instance = self
            .instances
            .load_instance(&message.instance_id)
            .await
            .map_err(WebhookError::from);

        let notified = match &instance {
            Ok(instance) => {
                post_notifications(
                    self.chat.as_ref(),
                    self.connections.as_ref(),
                    instance,
                    &webhook,
                )
                .await
            }
            Err(err) => Err(err.clone()),
        };
        match notified {
            Ok(sent) => report.direct_notifications = sent,
            Err(err) => error!(
                error = %err,
                instance_id = %message.instance_id,
                issue_key = %webhook.issue.key,
                "Failed to post direct notifications"
            ),
        }

        let instance = match instance {
            Ok(instance) => instance,
            Err(err) => return ProcessOutcome::Failed(err),
        };
        if let Err(err) = expand_issue(self.trackers.as_ref(), &instance, &mut webhook).await {
            return ProcessOutcome::Failed(err);
        }

        let subscribed =
            match get_channels_subscribed(self.subscriptions.as_ref(), &webhook, &instance.id)
                .await
            {
                Ok(subscribed) => subscribed,
                Err(err) => return ProcessOutcome::Failed(err),
            };

        let bot_user_id = self.chat.bot_user_id().to_string();
        for subscription in subscribed {
            if subscription.is_legacy() {
                debug!(subscription_id = %subscription.id, "Skipping subscription without creator");
                counter!("webhook_legacy_subscriptions_skipped_total").increment(1);
                report.skipped_legacy += 1;
                continue;
            }
            let owner = subscription.mattermost_user_id.as_str();

            if let (Ok(connection), Some(actor)) = (
                self.connections.load_connection(&instance.id, owner).await,
                webhook.actor.as_ref(),
            ) && connection.is_actor(actor)
            {
                report.skipped_self += 1;
                continue;
            }

            let connection = match check_permissions(
                self.trackers.as_ref(),
                self.connections.as_ref(),
                &instance,
                &webhook,
                owner,
            )
            .await
            {
                Ok(connection) => connection,
                Err(err) => {
                    error!(
                        error = %err,
                        mattermost_user_id = owner,
                        subscription_id = %subscription.id,
                        "Permission check failed"
                    );
                    report.permission_denied += 1;
                    continue;
                }
            };

            let roles = &subscription.filters.self_roles;
            if !roles.is_empty() {
                let held = match self.trackers.client_for(&instance, Some(&connection)) {
                    Ok(client) => {
                        creator_holds_role(
                            client.as_ref(),
                            &connection.tracker_user(),
                            &webhook.issue,
                            roles,
                        )
                        .await
                    }
                    Err(err) => Err(err),
                };
                match held {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(
                            subscription_id = %subscription.id,
                            issue_key = %webhook.issue.key,
                            "Subscription creator holds none of the required roles"
                        );
                        report.skipped_role += 1;
                        continue;
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            mattermost_user_id = owner,
                            subscription_id = %subscription.id,
                            "Role lookup failed"
                        );
                        report.skipped_role += 1;
                        continue;
                    }
                }
            }

            let post = channel_post(
                &instance,
                &webhook,
                &subscription.channel_id,
                &bot_user_id,
                &subscription.name,
                connection.settings.display_hidden_messages,
            );
            match self.chat.create_post(post).await {
                Ok(_) => {
                    info!(
                        mattermost_user_id = owner,
                        subscription_id = %subscription.id,
                        channel_id = %subscription.channel_id,
                        "Posted subscription notification"
                    );
                    report.channel_posts += 1;
                }
                Err(err) => {
                    error!(
                        error = %err,
                        channel_id = %subscription.channel_id,
                        subscription_id = %subscription.id,
                        "Failed to post to channel"
                    );
                    report.post_failures += 1;
                }
            }
        }

        ProcessOutcome::Posted(report)
    }
}

/// Producer side of the pool queue.
#[derive(Debug, Clone)]
pub struct WebhookQueue {
    sender: mpsc::Sender<WebhookMessage>,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("webhook queue is full")]
    QueueFull,
    #[error("webhook queue is closed")]
    Closed,
}

impl WebhookQueue {
    /// Queues a delivery without waiting.
    pub fn enqueue(&self, instance_id: InstanceId, payload: Vec<u8>) -> Result<(), EnqueueError> {
        self.sender
            .try_send(WebhookMessage::new(instance_id, payload))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    counter!("webhook_queue_rejected_total").increment(1);
                    EnqueueError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

/// Running totals across all workers.
#[derive(Debug, Default)]
pub struct WorkerPoolStats {
    processed: AtomicU64,
    posted: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
}

impl WorkerPoolStats {
    fn record(&self, outcome: &ProcessOutcome) {
        let bucket = match outcome {
            ProcessOutcome::Posted(_) => &self.posted,
            ProcessOutcome::Ignored(_) => &self.ignored,
            ProcessOutcome::Failed(_) => &self.failed,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Release);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct WorkerPool {
    queue: WebhookQueue,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<WorkerPoolStats>,
}

impl WorkerPool {
    /// Spawns `config.worker_count` workers on the current runtime.
    pub fn start(config: &WebhookWorkerConfig, processor: Arc<dyn WebhookProcessor>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let stats = Arc::new(WorkerPoolStats::default());

        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&processor),
                    shutdown.clone(),
                    Arc::clone(&stats),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            workers = workers.len(),
            queue_size = config.queue_size,
            "Webhook worker pool started"
        );

        Self {
            queue: WebhookQueue { sender },
            shutdown,
            workers,
            stats,
        }
    }

    pub fn queue(&self) -> WebhookQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, instance_id: InstanceId, payload: Vec<u8>) -> Result<(), EnqueueError> {
        self.queue.enqueue(instance_id, payload)
    }

    pub fn stats(&self) -> Arc<WorkerPoolStats> {
        Arc::clone(&self.stats)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue, waits for accepted messages to be processed and for
    /// every worker to exit.
    pub async fn shutdown(self) {
        info!("Webhook worker pool shutdown requested");
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(error = ?err, "Webhook worker exited abnormally");
            }
        }
        info!(
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Webhook worker pool stopped"
        );
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WebhookMessage>>>,
    processor: Arc<dyn WebhookProcessor>,
    shutdown: CancellationToken,
    stats: Arc<WorkerPoolStats>,
) {
    debug!(worker_id, "Webhook worker started");
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                message = receiver.recv() => message,
                _ = shutdown.cancelled() => {
                    // Stop accepting; whatever is buffered is still handed out.
                    receiver.close();
                    receiver.recv().await
                }
            }
        };
        let Some(message) = next else {
            break;
        };
        handle_message(worker_id, message, &processor, &stats).await;
    }
    debug!(worker_id, "Webhook worker stopped");
}

async fn handle_message(
    worker_id: usize,
    message: WebhookMessage,
    processor: &Arc<dyn WebhookProcessor>,
    stats: &WorkerPoolStats,
) {
    let instance_id = message.instance_id.clone();
    let queued_ms = (Utc::now() - message.received_at).num_milliseconds();
    histogram!("webhook_queue_wait_ms").record(queued_ms.max(0) as f64);

    gauge!("webhook_workers_busy").increment(1.0);
    let _busy = scopeguard::guard((), |_| gauge!("webhook_workers_busy").decrement(1.0));
    let started = Instant::now();

    let task_processor = Arc::clone(processor);
    let outcome =
        match tokio::spawn(async move { task_processor.process(&message).await }).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => ProcessOutcome::Failed(
                WebhookError::ProcessingPanicked(panic_message(err.into_panic())),
            ),
            Err(err) => ProcessOutcome::Failed(WebhookError::ProcessingPanicked(err.to_string())),
        };

    histogram!("webhook_processing_duration_ms")
        .record(started.elapsed().as_secs_f64() * 1_000.0);
    counter!("webhook_messages_total", "outcome" => outcome.label()).increment(1);
    stats.record(&outcome);

    match &outcome {
        ProcessOutcome::Posted(report) => debug!(
            worker_id,
            instance_id = %instance_id,
            channel_posts = report.channel_posts,
            direct_notifications = report.direct_notifications,
            skipped_legacy = report.skipped_legacy,
            skipped_self = report.skipped_self,
            permission_denied = report.permission_denied,
            post_failures = report.post_failures,
            "Webhook processed"
        ),
        ProcessOutcome::Ignored(reason) => debug!(
            worker_id,
            instance_id = %instance_id,
            reason = ?reason,
            "Webhook ignored"
        ),
        ProcessOutcome::Failed(err) => error!(
            worker_id,
            instance_id = %instance_id,
            error = %err,
            "Webhook processing failed"
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
