//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a mock converter injected, so whole batches can run through the
//! HTTP surface without an office installation.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use docbatch_core::{
    testing::MockConverter, BatchOrchestrator, Config, Converter, DatabaseConfig, JobStore,
    OrchestratorConfig, SqliteJobStore, StorageConfig, Workspace,
};

/// Re-export fixtures for test convenience
pub use docbatch_core::testing::fixtures;

const BOUNDARY: &str = "docbatch-test-boundary";

/// Test fixture for API testing with a mock converter.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_upload() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .upload("/api/v1/jobs", "batch.zip", &fixtures::docx_batch(2))
///         .await;
///
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock converter - script per-file outcomes and delays
    pub converter: Arc<MockConverter>,
    /// The orchestrator behind the router
    pub orchestrator: Arc<BatchOrchestrator>,
    /// Temporary directory for the database and job storage
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Response with the raw body, for downloads
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestFixture {
    /// Create a new test fixture with a running orchestrator.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let converter = Arc::new(MockConverter::new());
        if let Some(delay) = test_config.converter_delay {
            converter.set_delay(delay).await;
        }

        let config = Config {
            database: DatabaseConfig { path: db_path },
            storage: StorageConfig {
                root: temp_dir.path().join("storage"),
                scratch_dir: temp_dir.path().join("scratch"),
            },
            orchestrator: OrchestratorConfig::default()
                .with_max_parallel_units(2)
                .with_recover_on_start(false),
            ..Default::default()
        };

        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&config.database.path).expect("Failed to create job store"),
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            config.orchestrator.clone(),
            store,
            Arc::clone(&converter) as Arc<dyn Converter>,
            Workspace::from_config(&config.storage),
            Duration::from_secs(5),
        ));
        if !test_config.stopped {
            orchestrator.start().await;
        }

        let state = Arc::new(docbatch_server::state::AppState::new(
            config,
            Arc::clone(&orchestrator),
        ));
        let router = docbatch_server::api::create_router(state);

        Self {
            router,
            converter,
            orchestrator,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, Body::empty(), None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, Body::empty(), None).await
    }

    /// Upload `bytes` as multipart field `file` named `file_name`.
    pub async fn upload(&self, path: &str, file_name: &str, bytes: &[u8]) -> TestResponse {
        self.upload_field(path, "file", file_name, bytes).await
    }

    /// Upload `bytes` under an arbitrary multipart field name.
    pub async fn upload_field(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> TestResponse {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/zip\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        self.request("POST", path, Body::from(body), Some(&content_type))
            .await
    }

    /// Send a GET request and keep the raw body.
    pub async fn get_raw(&self, path: &str) -> RawResponse {
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
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        RawResponse {
            status,
            headers,
            body,
        }
    }

    /// Poll a job until its status is one of `statuses`.
    pub async fn wait_for_status(&self, job_id: &str, statuses: &[&str]) -> TestResponse {
        let start = std::time::Instant::now();
        loop {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            let done = response.body["status"]
                .as_str()
                .is_some_and(|s| statuses.contains(&s));
            if done || start.elapsed() > Duration::from_secs(10) {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Body,
        content_type: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            request_builder = request_builder.header("Content-Type", content_type);
        }
        let request = request_builder.body(body).unwrap();

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

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Leave the worker pool stopped so jobs stay `IN_PROGRESS`
    pub stopped: bool,
    /// Simulated time per conversion
    pub converter_delay: Option<Duration>,
}

impl TestConfig {
    /// Create config whose jobs never leave `IN_PROGRESS`.
    pub fn stopped() -> Self {
        Self {
            stopped: true,
            converter_delay: None,
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
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
