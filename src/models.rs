//! Core data model: `Task`, `ProgressEntry`, `ArtifactMetadata`, `LogEntry`,
//! plus the path-normalization rule every artifact path is built from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of work submitted by a user and dispatched to exactly one worker.
///
/// `task_id` is a monotonically increasing integer assigned by the
/// relational store on insert (see `storage::postgres`), never reused.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub task_id: i64,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[sqlx(json)]
    pub metadata: TaskMetadata,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// `status ∈ {pending, assigned, in_progress, completed, failed, cancelled}`,
/// monotonic forward except via the explicit (unexposed) admin reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// A task is terminal once it reaches one of these; only
    /// `metadata.response*` and `updated_at` may still change afterward.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal forward transition per the state
    /// machine in SPEC_FULL.md §3. Terminal states never transition again.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Pending) // sweeper reset is an UPDATE, not a new row
                | (Assigned, InProgress)
                | (Assigned, Pending) // sweeper reset of a stalled claim
                | (InProgress, Pending) // sweeper reset of a stalled run
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
                | (Assigned, Failed)
                | (Assigned, Cancelled)
                | (Pending, Cancelled)
        )
    }
}

/// Typed view over the task metadata column. Recognized keys are explicit
/// fields; anything else round-trips through `extra` so unknown keys are
/// never silently dropped (see SPEC_FULL.md §3, "Metadata representation").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskExecutionResult>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TaskMetadata {
    /// Merges `other` into `self` without dropping fields `other` leaves
    /// unset, matching `update_task_status`'s "merges metadata keys without
    /// dropping existing ones" contract.
    pub fn merge(&mut self, other: TaskMetadata) {
        if other.assigned_agent_id.is_some() {
            self.assigned_agent_id = other.assigned_agent_id;
        }
        if other.response.is_some() {
            self.response = other.response;
        }
        if other.response_updated_at.is_some() {
            self.response_updated_at = other.response_updated_at;
        }
        if other.last_agent.is_some() {
            self.last_agent = other.last_agent;
        }
        if other.result.is_some() {
            self.result = other.result;
        }
        self.extra.extend(other.extra);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskExecutionResult {
    Success {
        output: String,
        screenshots_uploaded: u32,
    },
    Failure {
        error: String,
        kind: Option<String>,
    },
}

/// An append-only record of a task's forward progress.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgressEntry {
    pub progress_id: i64,
    pub task_id: i64,
    pub agent_id: String,
    pub progress_percent: Option<f64>,
    pub message: String,
    #[sqlx(json)]
    pub data: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Metadata for a blob stored in the Object Store (C2); the blob itself is
/// addressable as `(bucket, object_path)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArtifactMetadata {
    pub artifact_id: i64,
    pub agent_id: String,
    pub task_id: Option<i64>,
    pub bucket: String,
    pub object_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    #[sqlx(json)]
    pub metadata: serde_json::Value,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only, diagnostic-only log record (C3). Not load-bearing for
/// control flow; `task_id` is a plain field with no referential constraint
/// (SPEC_FULL.md §9, "Cross-store soft foreign key from logs to tasks").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: String,
    pub agent_id: String,
    pub task_id: Option<i64>,
    pub level: LogLevel,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Lowercases the raw agent identifier and strips a trailing `-cua` (or
/// analogous vendor) suffix. Pure function, applied at every ingress point
/// (object-store paths, claim lookups, log/artifact rows) so the canonical
/// form is the only one ever persisted (SPEC_FULL.md §4.2).
pub fn normalize_agent_id(raw: &str) -> String {
    let lower = raw.to_lowercase();
    const VENDOR_SUFFIXES: &[&str] = &["-cua", "-agent", "-bot"];
    for suffix in VENDOR_SUFFIXES {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    lower
}

/// Round-robin nominal assignment used by the Hub API on submission:
/// `agent_{1 + (task_id mod N)}`.
pub fn round_robin_agent(task_id: i64, worker_count: u32) -> String {
    let n = worker_count.max(1) as i64;
    format!("agent{}", 1 + (task_id.rem_euclid(n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_cua_suffix_and_lowercases() {
        assert_eq!(normalize_agent_id("Agent2-CUA"), "agent2");
        assert_eq!(normalize_agent_id("agent2"), "agent2");
    }

    #[test]
    fn round_robin_wraps_by_worker_count() {
        assert_eq!(round_robin_agent(0, 3), "agent1");
        assert_eq!(round_robin_agent(1, 3), "agent2");
        assert_eq!(round_robin_agent(2, 3), "agent3");
        assert_eq!(round_robin_agent(3, 3), "agent1");
    }

    #[test]
    fn terminal_status_rejects_further_transitions() {
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn metadata_merge_keeps_unset_fields() {
        let mut m = TaskMetadata {
            assigned_agent_id: Some("agent1".into()),
            ..Default::default()
        };
        m.merge(TaskMetadata {
            response: Some("done".into()),
            ..Default::default()
        });
        assert_eq!(m.assigned_agent_id.as_deref(), Some("agent1"));
        assert_eq!(m.response.as_deref(), Some("done"));
    }
}
