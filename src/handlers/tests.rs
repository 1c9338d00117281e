//! # Tests for Handlers
//!
//! Router-level tests for webhook intake, the user header and the root route.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::Value;
use tokio::sync::Notify;
use tower::ServiceExt;

use crate::auth::MATTERMOST_USER_ID_HEADER;
use crate::chat::{ChatError, ChatSink};
use crate::config::{AppConfig, WebhookWorkerConfig};
use crate::models::{ChatUser, Connection, FileInfo, Instance, InstanceType, Post, TrackerUser};
use crate::repositories::{
    ConnectionStore, InMemoryConnectionStore, InMemoryInstanceStore, InMemorySubscriptionStore,
};
use crate::server::{AppState, create_app};
use crate::services::ServiceContext;
use crate::telemetry::REQUEST_ID_HEADER;
use crate::tracker::{TrackerClient, TrackerClientFactory, TrackerError};
use crate::webhook::{DeliveryReport, ProcessOutcome, WebhookMessage, WebhookProcessor, WorkerPool};
use crate::webhook_verification::{HUB_SIGNATURE_HEADER, sign_body};

const SECRET: &str = "s3cret";
const JIRA_URL: &str = "https://jira.example.com";
const PAYLOAD: &str = r#"{"webhookEvent":"jira:issue_created"}"#;

struct SilentChat;

#[async_trait]
impl ChatSink for SilentChat {
    fn bot_user_id(&self) -> &str {
        "bot"
    }

    async fn create_post(&self, post: Post) -> Result<Post, ChatError> {
        Ok(post)
    }

    async fn send_ephemeral_post(&self, _user_id: &str, _post: Post) -> Result<(), ChatError> {
        Ok(())
    }

    async fn delete_ephemeral_post(&self, _user_id: &str, _post_id: &str) -> Result<(), ChatError> {
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Post, ChatError> {
        Err(ChatError::Http {
            status: 404,
            message: format!("post {post_id} not found"),
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChatError> {
        Ok(ChatUser {
            id: user_id.to_string(),
            username: user_id.to_string(),
        })
    }

    async fn get_file_info(&self, file_id: &str) -> Result<FileInfo, ChatError> {
        Err(ChatError::Http {
            status: 404,
            message: format!("file {file_id} not found"),
        })
    }

    async fn get_file(&self, file_id: &str) -> Result<Vec<u8>, ChatError> {
        Err(ChatError::Http {
            status: 404,
            message: format!("file {file_id} not found"),
        })
    }

    async fn send_direct_message(&self, user_id: &str, message: &str) -> Result<Post, ChatError> {
        Ok(Post::new("bot", user_id, message))
    }
}

struct NoTracker;

impl TrackerClientFactory for NoTracker {
    fn client_for(
        &self,
        _instance: &Instance,
        _connection: Option<&Connection>,
    ) -> Result<Arc<dyn TrackerClient>, TrackerError> {
        Err(TrackerError::MissingCredentials("no tracker in tests".to_string()))
    }
}

/// Counts messages; holds the one whose payload is `hold` until released.
#[derive(Default)]
struct Recorder {
    processed: AtomicUsize,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl WebhookProcessor for Recorder {
    async fn process(&self, message: &WebhookMessage) -> ProcessOutcome {
        if message.payload == b"hold" {
            self.started.notify_one();
            self.release.notified().await;
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
        ProcessOutcome::Posted(DeliveryReport::default())
    }
}

struct TestApp {
    app: Router,
    pool: WorkerPool,
    recorder: Arc<Recorder>,
    connections: Arc<InMemoryConnectionStore>,
    instance: Instance,
}

async fn test_app(secret: Option<&str>, queue_size: usize) -> TestApp {
    let config = AppConfig {
        webhook_secret: secret.map(str::to_string),
        webhook_max_body_kb: 1,
        ..Default::default()
    };
    test_app_with(config, queue_size).await
}

async fn test_app_with(config: AppConfig, queue_size: usize) -> TestApp {
    let instance = Instance::new(JIRA_URL, InstanceType::Cloud);
    let instances = Arc::new(InMemoryInstanceStore::with_instances([instance.clone()]));
    let connections = Arc::new(InMemoryConnectionStore::new());

    let ctx = ServiceContext {
        instances,
        connections: connections.clone(),
        subscriptions: Arc::new(InMemorySubscriptionStore::new()),
        trackers: Arc::new(NoTracker),
        chat: Arc::new(SilentChat),
    };
    let recorder = Arc::new(Recorder::default());
    let pool = WorkerPool::start(
        &WebhookWorkerConfig {
            worker_count: 1,
            queue_size,
        },
        recorder.clone(),
    );
    let state = AppState::new(Arc::new(config), ctx, pool.queue());

    TestApp {
        app: create_app(state),
        pool,
        recorder,
        connections,
        instance,
    }
}

fn webhook_request(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_returns_service_info() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let body = json_body(response).await;
    assert_eq!(body["service"], "jira-bridge");
    t.pool.shutdown().await;
}

#[tokio::test]
async fn request_id_is_echoed() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(
            Request::get("/")
                .header(REQUEST_ID_HEADER, "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "req-123"
    );
    t.pool.shutdown().await;
}

#[tokio::test]
async fn webhook_with_query_secret_is_queued() {
    let t = test_app(Some(SECRET), 8).await;
    let response = t
        .app
        .clone()
        .oneshot(webhook_request(&format!("/webhook?secret={SECRET}"), PAYLOAD))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["status"], "accepted");

    t.pool.shutdown().await;
    assert_eq!(t.recorder.processed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn webhook_with_signature_header_is_queued() {
    let t = test_app(Some(SECRET), 8).await;
    let mut request = webhook_request("/webhook", PAYLOAD);
    request.headers_mut().insert(
        HUB_SIGNATURE_HEADER,
        sign_body(PAYLOAD.as_bytes(), SECRET).parse().unwrap(),
    );

    let response = t.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn webhook_without_secret_is_unauthorized() {
    let t = test_app(Some(SECRET), 8).await;
    let response = t
        .app
        .oneshot(webhook_request("/webhook", PAYLOAD))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    t.pool.shutdown().await;
    assert_eq!(t.recorder.processed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_forbidden() {
    let t = test_app(Some(SECRET), 8).await;
    let response = t
        .app
        .oneshot(webhook_request("/webhook?secret=nope", PAYLOAD))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
    t.pool.shutdown().await;
}

#[tokio::test]
async fn oversized_webhook_is_rejected() {
    let t = test_app(None, 8).await;
    let big = format!(r#"{{"pad":"{}"}}"#, "x".repeat(2048));
    let response = t
        .app
        .oneshot(webhook_request("/webhook", big))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    t.pool.shutdown().await;
}

/// Reader that fails as if the client dropped the connection mid-body.
struct DroppedConnection;

impl tokio::io::AsyncRead for DroppedConnection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _: &mut std::task::Context<'_>,
        _: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset)))
    }
}

#[tokio::test]
async fn unreadable_webhook_body_is_bad_request() {
    let t = test_app(None, 8).await;
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(DroppedConnection));
    let response = t
        .app
        .oneshot(webhook_request("/webhook", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
    assert_eq!(t.recorder.processed.load(Ordering::SeqCst), 0);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn empty_webhook_is_rejected() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(webhook_request("/webhook", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn instance_webhook_route_decodes_path() {
    let t = test_app(None, 8).await;
    let uri = format!("/instance/{}/webhook", t.instance.id.encoded());
    let response = t
        .app
        .clone()
        .oneshot(webhook_request(&uri, PAYLOAD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = t
        .app
        .clone()
        .oneshot(webhook_request("/instance/%25%25/webhook", PAYLOAD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = crate::models::InstanceId::new("https://other.example.com").encoded();
    let response = t
        .app
        .oneshot(webhook_request(&format!("/instance/{unknown}/webhook"), PAYLOAD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn full_queue_answers_service_unavailable() {
    let t = test_app(None, 1).await;

    let response = t
        .app
        .clone()
        .oneshot(webhook_request("/webhook", "hold"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    t.recorder.started.notified().await;

    let response = t
        .app
        .clone()
        .oneshot(webhook_request("/webhook", PAYLOAD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = t
        .app
        .clone()
        .oneshot(webhook_request("/webhook", PAYLOAD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get("retry-after").unwrap(), "5");
    assert_eq!(json_body(response).await["code"], "QUEUE_FULL");

    t.recorder.release.notify_one();
    t.pool.shutdown().await;
    assert_eq!(t.recorder.processed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn user_routes_require_user_header() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(
            Request::post("/api/v2/settings")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"setting":"notifications","value":"off"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn settings_update_for_connected_user() {
    let t = test_app(None, 8).await;
    t.connections
        .store_connection(
            &t.instance.id,
            "mm-alice",
            Connection::from_tracker_user(&TrackerUser::default(), "token"),
        )
        .await
        .unwrap();

    let response = t
        .app
        .clone()
        .oneshot(
            Request::post("/api/v2/settings")
                .header(CONTENT_TYPE, "application/json")
                .header(MATTERMOST_USER_ID_HEADER, "mm-alice")
                .body(Body::from(r#"{"setting":"notifications","value":"off"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        "Settings updated. notifications off."
    );

    let stored = t
        .connections
        .load_connection(&t.instance.id, "mm-alice")
        .await
        .unwrap();
    assert!(!stored.settings.notifications);

    let response = t
        .app
        .oneshot(
            Request::post("/api/v2/settings")
                .header(CONTENT_TYPE, "application/json")
                .header(MATTERMOST_USER_ID_HEADER, "mm-bob")
                .body(Body::from(r#"{"setting":"notifications","value":"on"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    t.pool.shutdown().await;
}

#[tokio::test]
async fn openapi_document_is_served() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["paths"]["/api/v2/transition"].is_object());
    assert!(body["paths"]["/webhook"].is_object());
    t.pool.shutdown().await;
}

fn bot_request(uri: &str, caller: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(MATTERMOST_USER_ID_HEADER, caller)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn bot_routes_only_admit_listed_callers() {
    let config = AppConfig {
        backdoor_bots: vec!["worklog-bot".to_string()],
        ..Default::default()
    };
    let t = test_app_with(config, 8).await;
    let uri = "/api/v2/backdoor/check-auth?user_id=mm-alice";

    let response = t
        .app
        .clone()
        .oneshot(bot_request(uri, "mm-alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["message"], "Not authorized");

    // Admitted: the request reaches the service, which finds no connection.
    let response = t
        .app
        .oneshot(bot_request(uri, "worklog-bot"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "NOT_CONNECTED");
    t.pool.shutdown().await;
}

#[tokio::test]
async fn bot_routes_are_closed_without_an_allowlist() {
    let t = test_app(None, 8).await;
    let response = t
        .app
        .oneshot(bot_request(
            "/api/v2/backdoor/issue?user_id=mm-alice&issue_key=PROJ-1",
            "worklog-bot",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    t.pool.shutdown().await;
}
