//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop for the bridge's HTTP API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers;
use crate::services::{
    BackdoorService, ConnectionService, IssueService, SearchService, ServiceContext,
    SettingsService, SubscriptionService,
};
use crate::telemetry::trace_context_middleware;
use crate::webhook::WebhookQueue;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub webhooks: WebhookQueue,
    pub issues: Arc<IssueService>,
    pub search: Arc<SearchService>,
    pub backdoor: Arc<BackdoorService>,
    pub settings: Arc<SettingsService>,
    pub connections: Arc<ConnectionService>,
    pub subscriptions: Arc<SubscriptionService>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, ctx: ServiceContext, webhooks: WebhookQueue) -> Self {
        Self {
            issues: Arc::new(IssueService::new(
                ctx.clone(),
                config.chat.site_url.clone(),
                config.max_attachment_size_bytes,
            )),
            search: Arc::new(SearchService::new(ctx.clone())),
            backdoor: Arc::new(BackdoorService::new(ctx.clone())),
            settings: Arc::new(SettingsService::new(ctx.clone())),
            connections: Arc::new(ConnectionService::new(ctx.clone())),
            subscriptions: Arc::new(SubscriptionService::new(ctx)),
            config,
            webhooks,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/transition", post(handlers::issues::transition_issue))
        .route("/assign", post(handlers::issues::assign_issue))
        .route(
            "/attach-comment-to-issue",
            post(handlers::issues::attach_comment_to_issue),
        )
        .route("/get-issue-by-key", get(handlers::issues::get_issue_by_key))
        .route(
            "/share-issue-publicly",
            post(handlers::issues::share_issue_publicly),
        )
        .route("/create-issue", post(handlers::issues::create_issue))
        .route("/update-issue", post(handlers::issues::update_issue))
        .route(
            "/issue-transitions",
            get(handlers::issues::get_issue_transitions),
        )
        .route(
            "/issue-available-assignees",
            get(handlers::issues::get_available_assignees),
        )
        .route("/get-search-issues", get(handlers::search::search_issues))
        .route(
            "/get-create-issue-metadata-for-project",
            get(handlers::search::get_create_issue_metadata),
        )
        .route(
            "/get-jira-project-metadata",
            get(handlers::search::get_project_metadata),
        )
        .route("/backdoor/check-auth", get(handlers::backdoor::check_auth))
        .route("/backdoor/issue", get(handlers::backdoor::get_issue))
        .route("/backdoor/project", get(handlers::backdoor::get_project))
        .route(
            "/backdoor/worklog-permission",
            get(handlers::backdoor::check_worklog_permission),
        )
        .route("/backdoor/worklog", post(handlers::backdoor::add_worklog))
        .route("/settings", post(handlers::settings::update_setting))
        .route(
            "/connect",
            post(handlers::connections::connect).delete(handlers::connections::disconnect),
        )
        .route("/connection", get(handlers::connections::get_connection))
        .route(
            "/subscriptions/channel",
            post(handlers::subscriptions::create_channel_subscription)
                .put(handlers::subscriptions::edit_channel_subscription),
        )
        .route(
            "/subscriptions/channel/{id}",
            get(handlers::subscriptions::list_channel_subscriptions)
                .delete(handlers::subscriptions::delete_channel_subscription),
        );

    Router::new()
        .route("/", get(handlers::root))
        .route("/webhook", post(handlers::webhooks::ingest_webhook))
        .route(
            "/instance/{encoded_id}/webhook",
            post(handlers::webhooks::ingest_instance_webhook),
        )
        .nest("/api/v2", api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves `state` until `shutdown` is cancelled, then finishes in-flight requests.
pub async fn run_server(
    config: Arc<AppConfig>,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::webhooks::ingest_webhook,
        crate::handlers::webhooks::ingest_instance_webhook,
        crate::handlers::issues::transition_issue,
        crate::handlers::issues::assign_issue,
        crate::handlers::issues::attach_comment_to_issue,
        crate::handlers::issues::get_issue_by_key,
        crate::handlers::issues::share_issue_publicly,
        crate::handlers::issues::create_issue,
        crate::handlers::issues::update_issue,
        crate::handlers::issues::get_issue_transitions,
        crate::handlers::issues::get_available_assignees,
        crate::handlers::search::search_issues,
        crate::handlers::search::get_create_issue_metadata,
        crate::handlers::search::get_project_metadata,
        crate::handlers::backdoor::check_auth,
        crate::handlers::backdoor::get_issue,
        crate::handlers::backdoor::get_project,
        crate::handlers::backdoor::check_worklog_permission,
        crate::handlers::backdoor::add_worklog,
        crate::handlers::settings::update_setting,
        crate::handlers::connections::connect,
        crate::handlers::connections::get_connection,
        crate::handlers::connections::disconnect,
        crate::handlers::subscriptions::list_channel_subscriptions,
        crate::handlers::subscriptions::create_channel_subscription,
        crate::handlers::subscriptions::edit_channel_subscription,
        crate::handlers::subscriptions::delete_channel_subscription,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::ActionResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::issues::AssignRequest,
            crate::handlers::issues::ShareIssueRequest,
            crate::handlers::issues::AttachCommentResponse,
            crate::handlers::settings::SettingsRequest,
            crate::handlers::connections::ConnectRequest,
            crate::handlers::connections::ConnectionResponse,
            crate::handlers::subscriptions::SubscriptionListResponse,
            crate::services::TransitionRequest,
            crate::services::AttachCommentRequest,
            crate::services::CreateIssueRequest,
            crate::services::UpdateIssueRequest,
            crate::services::WorklogRequest,
            crate::services::ProjectMetadata,
            crate::services::SelectOption,
            crate::models::ChannelSubscription,
            crate::models::Connection,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "webhooks", description = "Tracker webhook intake"),
        (name = "issues", description = "Issue actions on behalf of a chat user"),
        (name = "search", description = "Issue search and create-form metadata"),
        (name = "bots", description = "Allowlisted bots acting for a chat user"),
        (name = "settings", description = "User notification settings"),
        (name = "connections", description = "Tracker account connections"),
        (name = "subscriptions", description = "Channel subscriptions"),
    ),
    info(
        title = "Jira Bridge API",
        description = "Bridges Jira webhooks and actions into Mattermost",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
