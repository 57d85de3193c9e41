//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock pipeline stages injected, so the whole request lifecycle can be
//! driven through the HTTP API without the external fetch and upload tools.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use cadenza_core::config::{DatabaseConfig, ServerConfig};
use cadenza_core::testing::{MockFetcher, MockPackager, MockPublisher, RecordingNotifier};
use cadenza_core::{
    create_audit_system, AuditStore, Config, Dispatcher, DispatcherConfig, FanoutNotifier,
    PackagerConfig, PipelineStages, RequestStatus, RequestStore, SqliteAuditStore,
    SqlitePendingSelectionStore, SqliteRequestStore, SubmissionService,
};
use cadenza_server::api::WsBroadcaster;
use cadenza_server::state::AppState;

/// Re-export fixtures for test convenience
pub use cadenza_core::testing::fixtures;

/// Test fixture for E2E testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/requests", json!({
///         "user_id": 1, "chat_id": 10, "url": fixtures::album_url(1)
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock fetcher - control downloads and listings
    pub fetcher: Arc<MockFetcher>,
    pub packager: Arc<MockPackager>,
    /// Mock publisher - hands out `https://gofile.io/d/mock-<n>` links
    pub publisher: Arc<MockPublisher>,
    /// Every notice sent to request owners
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub request_store: Arc<dyn RequestStore>,
    pub ws_broadcaster: WsBroadcaster,
    /// Temporary directory for the database and workspaces
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Null` if empty or not JSON.
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a fixture whose dispatcher is not running.
    ///
    /// Submitted requests stay `queued`, which keeps API assertions
    /// deterministic.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let fetcher = Arc::new(MockFetcher::new());
        let packager = Arc::new(MockPackager::new());
        let publisher = Arc::new(MockPublisher::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
                ..Default::default()
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            dispatcher: DispatcherConfig {
                max_concurrent: test_config.max_concurrent,
                work_root: temp_dir.path().join("work"),
                poll_interval_secs: 1,
                ..Default::default()
            },
            packager: PackagerConfig {
                scratch_dir: temp_dir.path().join("scratch"),
                ..Default::default()
            },
            ..Default::default()
        };

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let request_store: Arc<dyn RequestStore> = Arc::new(
            SqliteRequestStore::new(&db_path).expect("Failed to create request store"),
        );
        let pending_store = Arc::new(
            SqlitePendingSelectionStore::new(&db_path)
                .expect("Failed to create pending selection store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let ws_broadcaster = WsBroadcaster::default();
        let fanout = FanoutNotifier::new()
            .with(Arc::clone(&notifier) as Arc<dyn cadenza_core::Notifier>)
            .with(Arc::new(ws_broadcaster.clone()));

        let stages = PipelineStages {
            fetcher: Arc::clone(&fetcher) as Arc<dyn cadenza_core::Fetcher>,
            packager: Arc::clone(&packager) as Arc<dyn cadenza_core::Packager>,
            publisher: Arc::clone(&publisher) as Arc<dyn cadenza_core::Publisher>,
            notifier: Arc::new(fanout),
        };

        let dispatcher = Arc::new(
            Dispatcher::new(
                config.dispatcher.clone(),
                config.packager.scratch_dir.clone(),
                Arc::clone(&request_store),
                stages,
                Some(audit_handle.clone()),
            )
            .expect("Failed to create dispatcher"),
        );
        if test_config.start_dispatcher {
            dispatcher.start().await;
        }

        let submission = Arc::new(SubmissionService::new(
            &config.submission,
            Arc::clone(&request_store),
            pending_store,
            Arc::clone(&fetcher) as Arc<dyn cadenza_core::Fetcher>,
            dispatcher.signal(),
            Some(audit_handle),
        ));

        let state = Arc::new(AppState::new(
            config,
            audit_store,
            Arc::clone(&request_store),
            submission,
            Arc::clone(&dispatcher),
            ws_broadcaster.clone(),
        ));

        let router = cadenza_server::api::create_router(state);

        Self {
            router,
            fetcher,
            packager,
            publisher,
            notifier,
            dispatcher,
            request_store,
            ws_broadcaster,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Submit a full request for `user_id` and return its id.
    pub async fn submit(&self, user_id: i64, url: &str) -> i64 {
        let response = self
            .post(
                "/api/v1/requests",
                serde_json::json!({
                    "user_id": user_id,
                    "chat_id": user_id * 10,
                    "url": url,
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.text);
        response.body["id"].as_i64().expect("request id")
    }

    /// Poll the store until the request reaches `status`.
    pub async fn wait_for_status(&self, id: i64, status: RequestStatus) -> cadenza_core::Request {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let request = self
                .request_store
                .get(id)
                .expect("store read")
                .expect("request exists");
            if request.status == status {
                return request;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "request {} stuck in {} waiting for {}",
                id,
                request.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll an endpoint until `check` accepts the JSON body.
    pub async fn wait_for_json(&self, path: &str, check: impl Fn(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get(path).await;
            if check(&response.body) {
                return response.body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting on {}: {}",
                path,
                response.text
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Run the dispatcher so submitted requests are processed
    pub start_dispatcher: bool,
    pub max_concurrent: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_dispatcher: false,
            max_concurrent: 2,
        }
    }
}

impl TestConfig {
    /// Create config with the dispatcher running.
    pub fn with_dispatcher() -> Self {
        Self {
            start_dispatcher: true,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
