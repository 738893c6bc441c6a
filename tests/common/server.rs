//! Test server lifecycle management.
//!
//! Each test gets an isolated hub: its own database, its own mock gateway
//! and events service, and a retry sweeper tuned for fast cycles.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pushbox_server::callback::CallbackValidator;
use pushbox_server::delivery::DeliveryCoordinator;
use pushbox_server::encryption::MessageCipher;
use pushbox_server::events::EventsConnector;
use pushbox_server::gateway::PushGatewayClient;
use pushbox_server::hub_store::SqliteHubStore;
use pushbox_server::push::PushDispatcher;
use pushbox_server::retry::{RetryPolicy, RetrySweeper};
use pushbox_server::server::server::make_app;
use pushbox_server::server::{RequestsLoggingLevel, ServerConfig};

use super::external::{MockEventsService, MockGateway};

/// User agent on the allow list of every test server.
pub const TEST_USER_AGENT: &str = "api-subscription-fields";

const SERVER_READY_TIMEOUT_MS: u64 = 5_000;
const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

/// Test server instance with isolated database and mock external services.
///
/// When dropped, the sweeper is cancelled and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Hub store for direct database access in tests
    pub hub_store: Arc<SqliteHubStore>,

    /// Scriptable push gateway mock
    pub gateway: MockGateway,

    /// Recording application-events mock
    pub events: MockEventsService,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawn a test server with a 60 second retry window.
    pub async fn spawn() -> Self {
        Self::spawn_with_retry_window(Duration::from_secs(60)).await
    }

    /// Spawn a test server with an explicit retry window. A zero window makes
    /// the first failed retry exhaust immediately.
    pub async fn spawn_with_retry_window(retry_window: Duration) -> Self {
        let gateway = MockGateway::spawn().await;
        let events = MockEventsService::spawn().await;

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("hub.db");

        let cipher = MessageCipher::new(MessageCipher::generate_key());
        let hub_store = Arc::new(
            SqliteHubStore::new(&db_path, cipher, 3600).expect("Failed to open hub store"),
        );

        let push_gateway = Arc::new(
            PushGatewayClient::new(gateway.base_url.clone(), "test-gateway-token".to_string(), 5)
                .expect("Failed to build gateway client"),
        );
        let events_sink = Arc::new(
            EventsConnector::new(events.base_url.clone(), 5)
                .expect("Failed to build events connector"),
        );

        let dispatcher = Arc::new(PushDispatcher::new(hub_store.clone(), push_gateway.clone()));
        let coordinator = Arc::new(DeliveryCoordinator::new(
            hub_store.clone(),
            hub_store.clone(),
            dispatcher.clone(),
        ));
        let callback_validator = Arc::new(CallbackValidator::new(
            hub_store.clone(),
            push_gateway,
            events_sink,
        ));

        // Zero backoff keeps retried notifications eligible every sweep
        let policy = RetryPolicy {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        };
        // The interval leaves the ingest-time push a comfortable head start,
        // so tests can assert exact gateway call counts; a failed batch is
        // still fully retried within one cycle thanks to the zero backoff.
        let sweeper = RetrySweeper::new(
            hub_store.clone(),
            dispatcher,
            policy,
            retry_window,
            Duration::from_millis(200),
            Duration::from_secs(3600),
        );

        let shutdown = CancellationToken::new();
        let sweeper_token = shutdown.clone();
        tokio::spawn(async move {
            sweeper.run(sweeper_token).await;
        });

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port: 0,
            allowed_user_agents: vec![TEST_USER_AGENT.to_string()],
            notifications_per_request: 100,
        };

        let app = make_app(
            config,
            hub_store.clone(),
            hub_store.clone(),
            coordinator,
            callback_validator,
            "test".to_string(),
        )
        .expect("Failed to build app");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            hub_store,
            gateway,
            events,
            _temp_dir: temp_dir,
            shutdown,
        };

        server.wait_for_ready().await;
        server
    }

    /// Waits for the server to become ready by polling the status route.
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    // === Request helpers ===

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    /// PUT /box and return the response.
    pub async fn create_box(&self, box_name: &str, client_id: &str) -> reqwest::Response {
        self.client()
            .put(format!("{}/box", self.base_url))
            .header("user-agent", TEST_USER_AGENT)
            .json(&serde_json::json!({ "boxName": box_name, "clientId": client_id }))
            .send()
            .await
            .expect("create_box request failed")
    }

    /// PUT /box, asserting success, returning the boxId.
    pub async fn create_box_id(&self, box_name: &str, client_id: &str) -> String {
        let response = self.create_box(box_name, client_id).await;
        assert!(
            response.status().is_success(),
            "create_box answered {}",
            response.status()
        );
        let body: serde_json::Value = response.json().await.unwrap();
        body["boxId"].as_str().unwrap().to_string()
    }

    /// PUT /box/{boxId}/callback.
    pub async fn update_callback(
        &self,
        box_id: &str,
        client_id: &str,
        callback_url: &str,
    ) -> reqwest::Response {
        self.client()
            .put(format!("{}/box/{}/callback", self.base_url, box_id))
            .json(&serde_json::json!({ "clientId": client_id, "callbackUrl": callback_url }))
            .send()
            .await
            .expect("update_callback request failed")
    }

    /// POST /box/{boxId}/notifications with an optional explicit id.
    pub async fn publish(
        &self,
        box_id: &str,
        content_type: &str,
        body: &str,
        notification_id: Option<&str>,
    ) -> reqwest::Response {
        let mut url = format!("{}/box/{}/notifications", self.base_url, box_id);
        if let Some(id) = notification_id {
            url.push_str(&format!("?notificationId={}", id));
        }
        self.client()
            .post(url)
            .header("content-type", content_type)
            .body(body.to_string())
            .send()
            .await
            .expect("publish request failed")
    }

    /// GET /box/{boxId}/notifications with a raw query string.
    pub async fn list_notifications(&self, box_id: &str, query: &str) -> reqwest::Response {
        self.client()
            .get(format!(
                "{}/box/{}/notifications{}",
                self.base_url, box_id, query
            ))
            .send()
            .await
            .expect("list request failed")
    }

    /// PUT /box/{boxId}/notifications/acknowledge.
    pub async fn acknowledge(&self, box_id: &str, ids: &[&str]) -> reqwest::Response {
        self.client()
            .put(format!(
                "{}/box/{}/notifications/acknowledge",
                self.base_url, box_id
            ))
            .json(&serde_json::json!({ "notificationIds": ids }))
            .send()
            .await
            .expect("acknowledge request failed")
    }

    /// Poll the box until some notification reaches `status` or time out.
    pub async fn wait_for_status(&self, box_id: &str, status: &str) -> serde_json::Value {
        let start = std::time::Instant::now();
        loop {
            let response = self
                .list_notifications(box_id, &format!("?status={}", status))
                .await;
            let body: serde_json::Value = response.json().await.unwrap();
            if let Some(first) = body.as_array().and_then(|a| a.first()) {
                return first.clone();
            }

            if start.elapsed() > Duration::from_secs(5) {
                panic!("No notification reached status {} within 5s", status);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // TempDir cleans up the database file
    }
}
