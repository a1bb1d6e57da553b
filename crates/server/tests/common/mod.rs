//! Common test utilities for E2E testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock targets and a mock listing agent injected, so whole batches can
//! run through the HTTP surface without a browser.

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

use relister_core::{
    config::DatabaseConfig,
    testing::{MockListingAgent, MockTargetDriver},
    BulkOrchestrator, Config, JobStore, ListingAgent, OrchestratorConfig,
    SqliteJobStore, TargetConfig, TargetDriver, TargetManager,
};
use relister_server::state::AppState;

/// Re-export fixtures for test convenience
pub use relister_core::testing::fixtures;

/// Test fixture for E2E testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_start_batch() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/batches", json!({ ... })).await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Orchestrator behind the router (absent without a bridge)
    pub orchestrator: Option<BulkOrchestrator>,
    /// Mock target driver - inspect opened/closed targets
    pub driver: Arc<MockTargetDriver>,
    /// Mock listing agent - configure products and failures
    pub agent: Arc<MockListingAgent>,
    /// Store shared with the orchestrator
    pub store: Arc<SqliteJobStore>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a fixture with an orchestrator wired to the mocks.
    pub async fn new() -> Self {
        Self::build(true)
    }

    /// Create a fixture as a server without a bridge would run.
    pub async fn without_bridge() -> Self {
        Self::build(false)
    }

    fn build(with_orchestrator: bool) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let driver = Arc::new(MockTargetDriver::new());
        let agent = Arc::new(MockListingAgent::new());
        let store = Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));

        let orchestrator_config = OrchestratorConfig {
            max_concurrency: 4,
            retry_backoff_ms: 10,
            scrape_load_timeout_ms: 1_000,
            form_load_timeout_ms: 1_000,
            ..Default::default()
        };
        let target_config = TargetConfig {
            handshake_timeout_ms: 500,
            handshake_interval_ms: 10,
        };

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            orchestrator: orchestrator_config.clone(),
            target: target_config.clone(),
            ..Config::default()
        };

        let orchestrator = with_orchestrator.then(|| {
            let targets = TargetManager::new(
                Arc::clone(&driver) as Arc<dyn TargetDriver>,
                target_config,
            );
            BulkOrchestrator::new(
                orchestrator_config,
                Arc::clone(&store) as Arc<dyn JobStore>,
                Arc::new(targets),
                Arc::clone(&agent) as Arc<dyn ListingAgent>,
            )
        });

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn JobStore>,
            orchestrator.clone(),
        ));

        let router = relister_server::api::create_router(state);

        Self {
            router,
            orchestrator,
            driver,
            agent,
            store,
            temp_dir,
        }
    }

    /// Wait until the running batch (if any) has finished.
    pub async fn wait_for_idle(&self) {
        if let Some(orchestrator) = &self.orchestrator {
            tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_idle())
                .await
                .expect("Batch did not finish in time");
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

    /// Fetch a path and return the body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// Send a request to the test server.
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

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}
