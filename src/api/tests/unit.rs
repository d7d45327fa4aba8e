use super::super::*;
use crate::models::ArtifactMetadata;
use crate::storage::{StorageFacade, TaskFilter};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

const TEST_API_KEY: &str = "test-secret-key-1234567890123456789012345678901234567890";

fn test_api_config() -> ApiConfig {
    ApiConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        api_key: Some(TEST_API_KEY.to_string()),
        allowed_origins: vec!["http://localhost:3000".to_string()],
        worker_count: 3,
    }
}

/// In-memory double implementing just enough of `StorageFacade` for routing
/// and auth tests, so these don't require a live Postgres/Mongo/MinIO.
struct NullStorage;

#[async_trait::async_trait]
impl StorageFacade for NullStorage {
    async fn create_task(&self, _: &str, _: &str, _: &str, _: crate::models::TaskMetadata) -> Result<i64> {
        Ok(1)
    }
    async fn get_task(&self, task_id: i64) -> Result<crate::models::Task> {
        Err(HubError::NotFound(format!("task {task_id}")))
    }
    async fn list_tasks(&self, _: TaskFilter) -> Result<(Vec<crate::models::Task>, i64)> {
        Ok((vec![], 0))
    }
    async fn update_task_status(
        &self,
        _: i64,
        _: TaskStatus,
        _: Option<&str>,
        _: Option<crate::models::TaskMetadata>,
    ) -> Result<()> {
        Ok(())
    }
    async fn claim_next_pending(&self, _: &str) -> Result<Option<crate::models::Task>> {
        Ok(None)
    }
    async fn sweep_stale_tasks(&self, _: chrono::Duration) -> Result<u64> {
        Ok(0)
    }
    async fn append_progress(&self, _: i64, _: &str, _: Option<f64>, _: &str, _: Option<serde_json::Value>) -> Result<i64> {
        Ok(1)
    }
    async fn list_progress(&self, _: i64, _: Option<i64>, _: i64) -> Result<Vec<crate::models::ProgressEntry>> {
        Ok(vec![])
    }
    async fn max_progress_percent(&self, _: i64) -> Result<Option<f64>> {
        Ok(None)
    }
    async fn latest_progress_per_agent(&self, _: i64) -> Result<Vec<crate::models::ProgressEntry>> {
        Ok(vec![])
    }
    async fn latest_progress(&self, _: i64) -> Result<Vec<(crate::models::ProgressEntry, crate::models::Task)>> {
        Ok(vec![])
    }
    async fn register_artifact(&self, _: &str, _: Option<i64>, _: &str, _: &str, _: &str, _: i64, _: serde_json::Value) -> Result<i64> {
        Ok(1)
    }
    async fn list_artifacts(&self, _: i64) -> Result<Vec<ArtifactMetadata>> {
        Ok(vec![])
    }
    async fn get_artifact(&self, artifact_id: i64) -> Result<ArtifactMetadata> {
        Err(HubError::NotFound(format!("artifact {artifact_id}")))
    }
    async fn latest_artifacts_per_agent(&self, _: &str, _: i64) -> Result<Vec<ArtifactMetadata>> {
        Ok(vec![])
    }
    async fn upload_object(&self, _: &str, _: &str, _: Vec<u8>, _: &str) -> Result<()> {
        Ok(())
    }
    async fn get_object(&self, bucket: &str, object_path: &str) -> Result<Vec<u8>> {
        Err(HubError::NotFound(format!("{bucket}/{object_path}")))
    }
    async fn presign_get(&self, _: &str, _: &str, _: std::time::Duration) -> Result<String> {
        Ok("https://example.invalid/signed".to_string())
    }
    async fn append_log(&self, _: &str, _: Option<i64>, _: crate::models::LogLevel, _: &str, _: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

fn test_server() -> ApiServer {
    ApiServer {
        config: test_api_config(),
        storage: std::sync::Arc::new(NullStorage),
        validator: std::sync::Arc::new(TaskContentValidator::new().unwrap()),
    }
}

#[tokio::test]
async fn health_requires_no_auth_but_other_routes_do() {
    let app = test_server().build_router();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/tasks").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header("x-api-key", TEST_API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_task_rejects_malicious_content() {
    let app = test_server().build_router();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/task")
                .header("x-api-key", TEST_API_KEY)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"text": "<script>alert(1)</script>"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_task_accepts_valid_content() {
    let app = test_server().build_router();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/task")
                .header("x-api-key", TEST_API_KEY)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"text": "print hello world"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let app = test_server().build_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header("authorization", format!("Bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_api_key_is_rejected() {
    let app = test_server().build_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/tasks")
                .header("x-api-key", "wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
