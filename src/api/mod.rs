//! Hub API (C8): the HTTP surface in front of the Storage Façade. Routing
//! and middleware layering follow the teacher's `ApiServer`/`build_router`
//! pattern in `api/mod.rs` (rate-limit → auth → trace → cors → routes);
//! the routes themselves are new, matching `spec.md` §6.1.

use crate::{
    auth::{auth_middleware, create_auth_state},
    config::{ApiConfig, Config},
    error::HubError,
    models::{round_robin_agent, Task, TaskMetadata, TaskStatus},
    rate_limit::{rate_limit_middleware, RateLimitConfig},
    storage::{StorageFacade, TaskFilter},
    validation::TaskContentValidator,
    Result,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASK: &str = "/task";
const ROUTE_TASK_BY_ID: &str = "/task/{task_id}";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_CHAT_AGENT_RESPONSES: &str = "/chat/agent-responses";
const ROUTE_AGENTS_LIVE: &str = "/agents/live";
const ROUTE_ARTIFACT_PRESIGNED: &str = "/artifacts/{artifact_id}/presigned";
const ROUTE_ADMIN_CANCEL: &str = "/admin/tasks/{task_id}/cancel";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    storage: Arc<dyn StorageFacade>,
    validator: Arc<TaskContentValidator>,
}

impl ApiServer {
    pub fn new(config: &Config, storage: Arc<dyn StorageFacade>) -> Result<Self> {
        Ok(Self {
            config: config.api.clone(),
            storage,
            validator: Arc::new(TaskContentValidator::new()?),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| HubError::Internal(e.into()))?;

        info!("hub API listening on {}:{}", self.config.host, self.config.port);

        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await
            .map_err(|e| HubError::Internal(e.into()))?;
        Ok(())
    }

    /// Layering order: rate-limit → auth → trace → cors → routes, matching
    /// the teacher's `build_router`.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());
        let rate_limit_state = Arc::new(RateLimitConfig::new());

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TASK, post(create_task))
            .route(ROUTE_TASK_BY_ID, get(get_task))
            .route(ROUTE_TASKS, get(list_tasks))
            .route(ROUTE_CHAT_AGENT_RESPONSES, get(chat_agent_responses))
            .route(ROUTE_AGENTS_LIVE, get(agents_live))
            .route(ROUTE_ARTIFACT_PRESIGNED, get(artifact_presigned))
            .route(ROUTE_ADMIN_CANCEL, post(cancel_task))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Conflict(_) => StatusCode::CONFLICT,
            HubError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => {
                let correlation_id = uuid::Uuid::new_v4();
                error!(%correlation_id, error = %self, "unhandled hub error");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "internal error".to_string(),
                        correlation_id: Some(correlation_id.to_string()),
                    }),
                )
                    .into_response();
            }
        };
        (status, Json(ErrorResponse { error: self.to_string(), correlation_id: None })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskResponse {
    task_id: i64,
    status: &'static str,
}

async fn create_task(
    State(server): State<ApiServer>,
    Json(req): Json<CreateTaskRequest>,
) -> std::result::Result<Json<CreateTaskResponse>, HubError> {
    let content = server.validator.validate_task_content(&req.text)?;
    let title: String = content.chars().take(crate::constants::TASK_TITLE_MAX_CHARS).collect();

    // Insert first to get the task_id the round-robin formula needs, then
    // fix up agent_id/metadata.assigned_agent_id to the computed nominal
    // agent, per spec.md §4.3.
    let task_id = server.storage.create_task("unassigned", &title, &content, TaskMetadata::default()).await?;
    let agent_id = round_robin_agent(task_id, server.config.worker_count);
    server
        .storage
        .update_task_status(
            task_id,
            TaskStatus::Pending,
            Some(&agent_id),
            Some(TaskMetadata { assigned_agent_id: Some(agent_id.clone()), ..Default::default() }),
        )
        .await?;

    Ok(Json(CreateTaskResponse { task_id, status: "created" }))
}

#[derive(Debug, Serialize)]
struct TaskDetailResponse {
    task: Task,
    progress: Vec<crate::models::ProgressEntry>,
    artifacts: Vec<crate::models::ArtifactMetadata>,
}

async fn get_task(
    State(server): State<ApiServer>,
    Path(task_id): Path<i64>,
) -> std::result::Result<Json<TaskDetailResponse>, HubError> {
    let task = server.storage.get_task(task_id).await?;
    let progress = server.storage.list_progress(task_id, None, 50).await?;
    let artifacts = server.storage.list_artifacts(task_id).await?;
    Ok(Json(TaskDetailResponse { task, progress, artifacts }))
}

#[derive(Debug, Deserialize)]
struct TaskQueryParams {
    status: Option<String>,
    agent_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ListTasksResponse {
    tasks: Vec<Task>,
    total: i64,
}

async fn list_tasks(
    State(server): State<ApiServer>,
    Query(params): Query<TaskQueryParams>,
) -> std::result::Result<Json<ListTasksResponse>, HubError> {
    let status = params.status.as_deref().map(parse_status).transpose()?;
    let (tasks, total) = server
        .storage
        .list_tasks(TaskFilter {
            agent_id: params.agent_id,
            status,
            limit: params.limit.unwrap_or(50),
            offset: params.offset.unwrap_or(0),
        })
        .await?;
    Ok(Json(ListTasksResponse { tasks, total }))
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    Ok(match s {
        "pending" => TaskStatus::Pending,
        "assigned" => TaskStatus::Assigned,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        other => return Err(HubError::Validation(format!("unknown status: {other}"))),
    })
}

#[derive(Debug, Deserialize)]
struct LimitParam {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AgentResponseMessage {
    id: i64,
    task_id: i64,
    agent_id: String,
    progress_percent: Option<f64>,
    message: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    task: Task,
}

async fn chat_agent_responses(
    State(server): State<ApiServer>,
    Query(params): Query<LimitParam>,
) -> std::result::Result<Json<serde_json::Value>, HubError> {
    let rows = server.storage.latest_progress(params.limit.unwrap_or(50)).await?;
    let messages: Vec<AgentResponseMessage> = rows
        .into_iter()
        .map(|(progress, task)| AgentResponseMessage {
            id: progress.progress_id,
            task_id: progress.task_id,
            agent_id: progress.agent_id,
            progress_percent: progress.progress_percent,
            message: progress.message,
            timestamp: progress.timestamp,
            task,
        })
        .collect();
    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
struct AgentsLiveParams {
    limit_per_agent: Option<i64>,
}

async fn agents_live(
    State(server): State<ApiServer>,
    Query(params): Query<AgentsLiveParams>,
) -> std::result::Result<Json<serde_json::Value>, HubError> {
    let limit = params.limit_per_agent.unwrap_or(10);
    let latest = server.storage.latest_progress_per_agent(limit).await?;

    let mut agents = Vec::new();
    for progress in &latest {
        let recent_progress = server.storage.list_progress(progress.task_id, None, limit).await?;
        let artifacts = server.storage.latest_artifacts_per_agent(&progress.agent_id, limit).await?;
        let mut presigned_artifacts = Vec::new();
        for artifact in artifacts {
            let url = if artifact.bucket == crate::constants::BUCKET_SCREENSHOTS {
                server
                    .storage
                    .presign_get(&artifact.bucket, &artifact.object_path, std::time::Duration::from_secs(3600))
                    .await
                    .ok()
            } else {
                None
            };
            presigned_artifacts.push(serde_json::json!({
                "artifact_id": artifact.artifact_id,
                "object_path": artifact.object_path,
                "content_type": artifact.content_type,
                "uploaded_at": artifact.uploaded_at,
                "url": url,
            }));
        }
        agents.push(serde_json::json!({
            "agent_id": progress.agent_id,
            "latest_progress": progress,
            "recent_progress": recent_progress,
            "artifacts": presigned_artifacts,
        }));
    }

    Ok(Json(serde_json::json!({
        "generated_at": chrono::Utc::now(),
        "agents": agents,
    })))
}

#[derive(Debug, Deserialize)]
struct PresignParams {
    ttl_seconds: Option<u64>,
}

async fn artifact_presigned(
    State(server): State<ApiServer>,
    Path(artifact_id): Path<i64>,
    Query(params): Query<PresignParams>,
) -> std::result::Result<Json<serde_json::Value>, HubError> {
    let artifact = server.storage.get_artifact(artifact_id).await?;
    if artifact.bucket != crate::constants::BUCKET_SCREENSHOTS {
        return Err(HubError::Validation("presigned URLs are only available for the screenshots bucket".to_string()));
    }
    let ttl = std::time::Duration::from_secs(params.ttl_seconds.unwrap_or(3600));
    let url = server.storage.presign_get(&artifact.bucket, &artifact.object_path, ttl).await?;
    Ok(Json(serde_json::json!({ "url": url })))
}

#[cfg(test)]
mod tests;

async fn cancel_task(
    State(server): State<ApiServer>,
    Path(task_id): Path<i64>,
) -> std::result::Result<Json<serde_json::Value>, HubError> {
    server.storage.update_task_status(task_id, TaskStatus::Cancelled, None, None).await?;
    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}
