//! Storage Façade (C4): the single seam C6 (worker loop) and C8 (Hub API)
//! depend on, mirroring the teacher's `Agent` trait / `dyn Agent` registry
//! in `agents/mod.rs` — callers hold a `dyn StorageFacade`, never the
//! concrete Postgres/object-store/Mongo clients directly.

mod logstore;
mod objectstore;
mod postgres;
#[cfg(test)]
mod tests;

pub use logstore::MongoLogStore;
pub use objectstore::ObjectStore;
pub use postgres::PostgresStore;

use crate::error::Result;
use crate::models::{ArtifactMetadata, LogEntry, LogLevel, ProgressEntry, Task, TaskMetadata, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Filters accepted by `list_tasks`; all fields optional.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub agent_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait StorageFacade: Send + Sync {
    async fn create_task(
        &self,
        agent_id: &str,
        title: &str,
        description: &str,
        metadata: TaskMetadata,
    ) -> Result<i64>;

    async fn get_task(&self, task_id: i64) -> Result<Task>;

    async fn list_tasks(&self, filter: TaskFilter) -> Result<(Vec<Task>, i64)>;

    /// Refuses any transition `TaskStatus::can_transition_to` rejects;
    /// merges `metadata_merge` into the existing metadata without dropping
    /// unrelated keys (see `TaskMetadata::merge`).
    async fn update_task_status(
        &self,
        task_id: i64,
        new_status: TaskStatus,
        agent_id: Option<&str>,
        metadata_merge: Option<TaskMetadata>,
    ) -> Result<()>;

    /// At-most-once claim (C5): locks and returns the earliest eligible
    /// `pending` task assigned to `agent_id`, or `None` if there is none.
    async fn claim_next_pending(&self, agent_id: &str) -> Result<Option<Task>>;

    /// Resets tasks stuck `assigned`/`in_progress` whose last progress row
    /// is older than `grace`, back to `pending`, appending a recovery
    /// progress row for each. Returns the count reset.
    async fn sweep_stale_tasks(&self, grace: chrono::Duration) -> Result<u64>;

    async fn append_progress(
        &self,
        task_id: i64,
        agent_id: &str,
        percent: Option<f64>,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<i64>;

    async fn list_progress(
        &self,
        task_id: i64,
        since_progress_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ProgressEntry>>;

    async fn max_progress_percent(&self, task_id: i64) -> Result<Option<f64>>;

    async fn latest_progress_per_agent(&self, limit_per_agent: i64) -> Result<Vec<ProgressEntry>>;

    async fn latest_progress(&self, limit: i64) -> Result<Vec<(ProgressEntry, Task)>>;

    async fn register_artifact(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        bucket: &str,
        object_path: &str,
        content_type: &str,
        size_bytes: i64,
        metadata: serde_json::Value,
    ) -> Result<i64>;

    async fn list_artifacts(&self, task_id: i64) -> Result<Vec<ArtifactMetadata>>;

    async fn get_artifact(&self, artifact_id: i64) -> Result<ArtifactMetadata>;

    async fn latest_artifacts_per_agent(
        &self,
        agent_id: &str,
        limit: i64,
    ) -> Result<Vec<ArtifactMetadata>>;

    /// Stores the blob; idempotent by `(bucket, object_path)` — replaying
    /// with identical bytes is a no-op, replaying with different bytes is a
    /// `Conflict`.
    async fn upload_object(
        &self,
        bucket: &str,
        object_path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn get_object(&self, bucket: &str, object_path: &str) -> Result<Vec<u8>>;

    async fn presign_get(&self, bucket: &str, object_path: &str, ttl: std::time::Duration) -> Result<String>;

    async fn append_log(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        level: LogLevel,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;
}

/// The concrete façade wiring the three backends together. Constructed once
/// at process start (see `main.rs`/`bin/worker.rs`) and shared as
/// `Arc<dyn StorageFacade>`.
pub struct Storage {
    pub postgres: PostgresStore,
    pub objects: ObjectStore,
    pub logs: MongoLogStore,
}

impl Storage {
    pub async fn connect(config: &crate::config::Config) -> Result<Self> {
        let postgres = PostgresStore::connect(&config.postgres.url).await?;
        let objects = ObjectStore::connect(&config.objects).await?;
        let logs = MongoLogStore::connect(&config.mongo.url).await?;
        Ok(Self { postgres, objects, logs })
    }
}

#[async_trait]
impl StorageFacade for Storage {
    async fn create_task(&self, agent_id: &str, title: &str, description: &str, metadata: TaskMetadata) -> Result<i64> {
        self.postgres.create_task(agent_id, title, description, metadata).await
    }

    async fn get_task(&self, task_id: i64) -> Result<Task> {
        self.postgres.get_task(task_id).await
    }

    async fn list_tasks(&self, filter: TaskFilter) -> Result<(Vec<Task>, i64)> {
        self.postgres.list_tasks(filter).await
    }

    async fn update_task_status(
        &self,
        task_id: i64,
        new_status: TaskStatus,
        agent_id: Option<&str>,
        metadata_merge: Option<TaskMetadata>,
    ) -> Result<()> {
        self.postgres
            .update_task_status(task_id, new_status, agent_id, metadata_merge)
            .await
    }

    async fn claim_next_pending(&self, agent_id: &str) -> Result<Option<Task>> {
        self.postgres.claim_next_pending(agent_id).await
    }

    async fn sweep_stale_tasks(&self, grace: chrono::Duration) -> Result<u64> {
        self.postgres.sweep_stale_tasks(grace).await
    }

    async fn append_progress(
        &self,
        task_id: i64,
        agent_id: &str,
        percent: Option<f64>,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<i64> {
        self.postgres.append_progress(task_id, agent_id, percent, message, data).await
    }

    async fn list_progress(&self, task_id: i64, since_progress_id: Option<i64>, limit: i64) -> Result<Vec<ProgressEntry>> {
        self.postgres.list_progress(task_id, since_progress_id, limit).await
    }

    async fn max_progress_percent(&self, task_id: i64) -> Result<Option<f64>> {
        self.postgres.max_progress_percent(task_id).await
    }

    async fn latest_progress_per_agent(&self, limit_per_agent: i64) -> Result<Vec<ProgressEntry>> {
        self.postgres.latest_progress_per_agent(limit_per_agent).await
    }

    async fn latest_progress(&self, limit: i64) -> Result<Vec<(ProgressEntry, Task)>> {
        self.postgres.latest_progress(limit).await
    }

    async fn register_artifact(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        bucket: &str,
        object_path: &str,
        content_type: &str,
        size_bytes: i64,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        self.postgres
            .register_artifact(agent_id, task_id, bucket, object_path, content_type, size_bytes, metadata)
            .await
    }

    async fn list_artifacts(&self, task_id: i64) -> Result<Vec<ArtifactMetadata>> {
        self.postgres.list_artifacts(task_id).await
    }

    async fn get_artifact(&self, artifact_id: i64) -> Result<ArtifactMetadata> {
        self.postgres.get_artifact(artifact_id).await
    }

    async fn latest_artifacts_per_agent(&self, agent_id: &str, limit: i64) -> Result<Vec<ArtifactMetadata>> {
        self.postgres.latest_artifacts_per_agent(agent_id, limit).await
    }

    async fn upload_object(&self, bucket: &str, object_path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.upload_object(bucket, object_path, bytes, content_type).await
    }

    async fn get_object(&self, bucket: &str, object_path: &str) -> Result<Vec<u8>> {
        self.objects.get_object(bucket, object_path).await
    }

    async fn presign_get(&self, bucket: &str, object_path: &str, ttl: std::time::Duration) -> Result<String> {
        self.objects.presign_get(bucket, object_path, ttl).await
    }

    async fn append_log(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        level: LogLevel,
        message: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let entry = LogEntry {
            log_id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            task_id,
            level,
            message: message.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.logs.append_log(entry).await
    }
}

/// Grace window used by the sweeper: `2 × task_timeout`, per `spec.md` §9's
/// resolution ("grace is measured since the task's last progress row").
pub fn default_sweep_grace(task_timeout_secs: u64) -> chrono::Duration {
    chrono::Duration::seconds((task_timeout_secs as i64) * 2)
}

pub type Timestamp = DateTime<Utc>;
