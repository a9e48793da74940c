//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! around a real task engine driven by a mock converter, so requests can be
//! exercised without ffmpeg or a listening socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use convertd_core::{
    cache::DEFAULT_TTL,
    testing::{fixtures, MockConverter},
    Converter, CreateTaskRequest, EngineConfig, InMemoryCache, SqliteTaskStore, Task, TaskCache,
    TaskEngine, TaskStatus, TaskStore,
};
use convertd_server::state::{AppState, SharedEngine};

/// Test fixture with a running engine and an in-process router.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_progress() {
///     let fixture = TestFixture::new().await;
///     let task = fixture.create_task("clip.mp4");
///
///     let response = fixture.get(&format!("/api/v1/tasks/{}/progress", task.id)).await;
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub engine: Arc<SharedEngine>,
    pub store: Arc<SqliteTaskStore>,
    /// Mock converter - control conversion behavior
    pub converter: MockConverter,
    /// Temporary directory for the database, inputs and outputs
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    /// Create a fixture whose engine is already running.
    pub async fn new() -> Self {
        let fixture = Self::stopped().await;
        fixture.engine.start().await;
        fixture
    }

    /// Create a fixture without starting the engine.
    pub async fn stopped() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteTaskStore::new(&temp_dir.path().join("test.db"))
                .expect("Failed to create task store"),
        );

        let converter = MockConverter::new();
        converter
            .set_conversion_duration(Duration::from_millis(20))
            .await;

        let config = EngineConfig::default()
            .with_workers(1)
            .with_scan_interval_ms(20);
        let shared: Arc<dyn Converter> = Arc::new(converter.clone());
        let engine = Arc::new(TaskEngine::new(
            config,
            temp_dir.path().join("output"),
            store.clone(),
            TaskCache::new(Arc::new(InMemoryCache::new()), DEFAULT_TTL),
            shared,
        ));

        let state = Arc::new(AppState::new(engine.clone(), store.clone()));
        let router = convertd_server::api::create_router(state);

        Self {
            router,
            engine,
            store,
            converter,
            temp_dir,
        }
    }

    pub fn create_task(&self, name: &str) -> Task {
        let path: PathBuf = fixtures::write_input(&self.temp_dir.path().join("uploads"), name)
            .expect("Failed to write input");
        self.store
            .create(CreateTaskRequest::upload(path))
            .expect("Failed to create task")
    }

    pub async fn wait_for_status(&self, id: &str, status: TaskStatus) -> Task {
        for _ in 0..500 {
            let task = self.store.get(id).unwrap().expect("task exists");
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", id, status);
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
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
