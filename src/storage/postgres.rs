//! Relational task store (C1) and claim protocol (C5), grounded in the
//! teacher's `agents/orchestrator/task_queue.rs`/`result_store.rs` for the
//! overall "one struct wrapping a pool, one method per operation" shape —
//! the actual persistence and locking semantics are new, since the teacher
//! kept its queue in memory.

use super::TaskFilter;
use crate::error::{HubError, Result};
use crate::models::{ArtifactMetadata, ProgressEntry, Task, TaskMetadata, TaskStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        sqlx::migrate!("migrations").run(&pool).await.map_err(|e| {
            HubError::StorageUnavailable(format!("migration failed: {e}"))
        })?;
        Ok(Self { pool })
    }

    pub async fn create_task(
        &self,
        agent_id: &str,
        title: &str,
        description: &str,
        metadata: TaskMetadata,
    ) -> Result<i64> {
        let metadata_json = serde_json::to_value(&metadata)?;
        let row = sqlx::query(
            r#"INSERT INTO tasks (agent_id, title, description, status, metadata)
               VALUES ($1, $2, $3, 'pending', $4)
               RETURNING task_id"#,
        )
        .bind(agent_id)
        .bind(title)
        .bind(description)
        .bind(metadata_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("task_id"))
    }

    pub async fn get_task(&self, task_id: i64) -> Result<Task> {
        sqlx::query_as::<_, Task>(
            r#"SELECT task_id, agent_id, title, description, status, metadata, created_at, updated_at
               FROM tasks WHERE task_id = $1"#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> Result<(Vec<Task>, i64)> {
        let limit = if filter.limit <= 0 { 50 } else { filter.limit };
        let tasks = sqlx::query_as::<_, Task>(
            r#"SELECT task_id, agent_id, title, description, status, metadata, created_at, updated_at
               FROM tasks
               WHERE ($1::text IS NULL OR agent_id = $1)
                 AND ($2::text IS NULL OR status = $2)
               ORDER BY created_at DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(&filter.agent_id)
        .bind(filter.status.map(status_to_str))
        .bind(limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query(
            r#"SELECT count(*) AS total FROM tasks
               WHERE ($1::text IS NULL OR agent_id = $1)
                 AND ($2::text IS NULL OR status = $2)"#,
        )
        .bind(&filter.agent_id)
        .bind(filter.status.map(status_to_str))
        .fetch_one(&self.pool)
        .await?
        .get("total");

        Ok((tasks, total))
    }

    pub async fn update_task_status(
        &self,
        task_id: i64,
        new_status: TaskStatus,
        agent_id: Option<&str>,
        metadata_merge: Option<TaskMetadata>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"SELECT status, metadata FROM tasks WHERE task_id = $1 FOR UPDATE"#,
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("task {task_id} not found")))?;

        let current: TaskStatus = str_to_status(row.get("status"))?;
        if !current.can_transition_to(new_status) {
            return Err(HubError::Conflict(format!(
                "cannot transition task {task_id} from {current:?} to {new_status:?}"
            )));
        }

        let mut metadata: TaskMetadata = serde_json::from_value(row.get("metadata"))?;
        if let Some(merge) = metadata_merge {
            metadata.merge(merge);
        }
        let metadata_json = serde_json::to_value(&metadata)?;

        sqlx::query(
            r#"UPDATE tasks
               SET status = $1,
                   agent_id = COALESCE($2, agent_id),
                   metadata = $3,
                   updated_at = now()
               WHERE task_id = $4"#,
        )
        .bind(status_to_str(new_status))
        .bind(agent_id)
        .bind(metadata_json)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// `SELECT ... FOR UPDATE SKIP LOCKED`-style single transaction: locks
    /// the earliest eligible `pending` task for `agent_id`, flips it to
    /// `assigned`, commits. Once returned here, a task is never returned
    /// again to any caller (enforced by the row lock + status flip being
    /// atomic in one transaction).
    pub async fn claim_next_pending(&self, agent_id: &str) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"SELECT task_id, agent_id, title, description, status, metadata, created_at, updated_at
               FROM tasks
               WHERE status = 'pending' AND agent_id = $1
               ORDER BY created_at ASC, task_id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(agent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let task_id: i64 = row.get("task_id");
        sqlx::query(
            r#"UPDATE tasks SET status = 'assigned', agent_id = $1, updated_at = now() WHERE task_id = $2"#,
        )
        .bind(agent_id)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_task(task_id).await.map(Some)
    }

    /// Resets tasks stuck in `assigned`/`in_progress` whose last progress
    /// row (or `updated_at`, if none) is older than `grace`.
    pub async fn sweep_stale_tasks(&self, grace: chrono::Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - grace;
        let rows = sqlx::query(
            r#"SELECT t.task_id
               FROM tasks t
               LEFT JOIN LATERAL (
                   SELECT timestamp FROM task_progress p
                   WHERE p.task_id = t.task_id
                   ORDER BY p.progress_id DESC LIMIT 1
               ) last_progress ON true
               WHERE t.status IN ('assigned', 'in_progress')
                 AND COALESCE(last_progress.timestamp, t.updated_at) < $1
               FOR UPDATE OF t SKIP LOCKED"#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut reset = 0u64;
        for row in rows {
            let task_id: i64 = row.get("task_id");
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"UPDATE tasks SET status = 'pending', updated_at = now() WHERE task_id = $1
                   AND status IN ('assigned', 'in_progress')"#,
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"INSERT INTO task_progress (task_id, agent_id, progress_percent, message)
                   SELECT task_id, agent_id, NULL, 'sweeper reset: stale claim/run' FROM tasks WHERE task_id = $1"#,
            )
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            reset += 1;
        }
        Ok(reset)
    }

    pub async fn append_progress(
        &self,
        task_id: i64,
        agent_id: &str,
        percent: Option<f64>,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"INSERT INTO task_progress (task_id, agent_id, progress_percent, message, data)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING progress_id"#,
        )
        .bind(task_id)
        .bind(agent_id)
        .bind(percent)
        .bind(message)
        .bind(data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("progress_id"))
    }

    pub async fn list_progress(
        &self,
        task_id: i64,
        since_progress_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<ProgressEntry>> {
        let limit = if limit <= 0 { 50 } else { limit };
        let rows = sqlx::query_as::<_, ProgressEntry>(
            r#"SELECT progress_id, task_id, agent_id, progress_percent, message, data, timestamp
               FROM task_progress
               WHERE task_id = $1 AND ($2::bigint IS NULL OR progress_id > $2)
               ORDER BY progress_id ASC
               LIMIT $3"#,
        )
        .bind(task_id)
        .bind(since_progress_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn max_progress_percent(&self, task_id: i64) -> Result<Option<f64>> {
        let row = sqlx::query(
            r#"SELECT max(progress_percent) AS max_percent FROM task_progress WHERE task_id = $1"#,
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("max_percent"))
    }

    pub async fn latest_progress_per_agent(&self, limit_per_agent: i64) -> Result<Vec<ProgressEntry>> {
        let limit = if limit_per_agent <= 0 { 1 } else { limit_per_agent };
        let rows = sqlx::query_as::<_, ProgressEntry>(
            r#"SELECT DISTINCT ON (agent_id) progress_id, task_id, agent_id, progress_percent, message, data, timestamp
               FROM task_progress
               ORDER BY agent_id, progress_id DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn latest_progress(&self, limit: i64) -> Result<Vec<(ProgressEntry, Task)>> {
        let limit = if limit <= 0 { 50 } else { limit };
        let rows = sqlx::query(
            r#"SELECT p.progress_id, p.task_id, p.agent_id, p.progress_percent, p.message, p.data, p.timestamp,
                      t.task_id AS t_task_id, t.agent_id AS t_agent_id, t.title, t.description, t.status,
                      t.metadata, t.created_at, t.updated_at
               FROM task_progress p
               JOIN tasks t ON t.task_id = p.task_id
               ORDER BY p.progress_id DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let progress = ProgressEntry {
                    progress_id: row.get("progress_id"),
                    task_id: row.get("task_id"),
                    agent_id: row.get("agent_id"),
                    progress_percent: row.get("progress_percent"),
                    message: row.get("message"),
                    data: row.get("data"),
                    timestamp: row.get("timestamp"),
                };
                let metadata: TaskMetadata = serde_json::from_value(row.get("metadata"))?;
                let task = Task {
                    task_id: row.get("t_task_id"),
                    agent_id: row.get("t_agent_id"),
                    title: row.get("title"),
                    description: row.get("description"),
                    status: str_to_status(row.get("status"))?,
                    metadata,
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                };
                Ok((progress, task))
            })
            .collect()
    }

    pub async fn register_artifact(
        &self,
        agent_id: &str,
        task_id: Option<i64>,
        bucket: &str,
        object_path: &str,
        content_type: &str,
        size_bytes: i64,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"INSERT INTO artifact_metadata (agent_id, task_id, bucket, object_path, content_type, size_bytes, metadata)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING artifact_id"#,
        )
        .bind(agent_id)
        .bind(task_id)
        .bind(bucket)
        .bind(object_path)
        .bind(content_type)
        .bind(size_bytes)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("artifact_id"))
    }

    pub async fn list_artifacts(&self, task_id: i64) -> Result<Vec<ArtifactMetadata>> {
        let rows = sqlx::query_as::<_, ArtifactMetadata>(
            r#"SELECT artifact_id, agent_id, task_id, bucket, object_path, content_type, size_bytes, metadata, uploaded_at
               FROM artifact_metadata WHERE task_id = $1 ORDER BY uploaded_at ASC"#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_artifact(&self, artifact_id: i64) -> Result<ArtifactMetadata> {
        sqlx::query_as::<_, ArtifactMetadata>(
            r#"SELECT artifact_id, agent_id, task_id, bucket, object_path, content_type, size_bytes, metadata, uploaded_at
               FROM artifact_metadata WHERE artifact_id = $1"#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("artifact {artifact_id} not found")))
    }

    pub async fn latest_artifacts_per_agent(&self, agent_id: &str, limit: i64) -> Result<Vec<ArtifactMetadata>> {
        let limit = if limit <= 0 { 10 } else { limit };
        let rows = sqlx::query_as::<_, ArtifactMetadata>(
            r#"SELECT artifact_id, agent_id, task_id, bucket, object_path, content_type, size_bytes, metadata, uploaded_at
               FROM artifact_metadata WHERE agent_id = $1 ORDER BY uploaded_at DESC LIMIT $2"#,
        )
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Assigned => "assigned",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn str_to_status(s: String) -> Result<TaskStatus> {
    Ok(match s.as_str() {
        "pending" => TaskStatus::Pending,
        "assigned" => TaskStatus::Assigned,
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        other => return Err(HubError::Internal(anyhow::anyhow!("unknown task status: {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let s = status_to_str(status).to_string();
            assert_eq!(str_to_status(s).unwrap(), status);
        }
    }
}
