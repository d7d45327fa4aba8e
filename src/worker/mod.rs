//! Worker Loop (C6): one `WorkerRuntime` per `normalized_agent_id`, driving
//! the Idle → Preparing → Running → Uploading → Finalize state machine.
//! Grounded in the teacher's `AgentOrchestrator::run` (`tokio::select!`
//! racing a processing loop against external signals) in
//! `agents/orchestrator/mod.rs`.

pub mod circuit_breaker;
pub mod executor;

use crate::config::Config;
use crate::error::{HubError, Result};
use crate::models::{normalize_agent_id, Task, TaskExecutionResult, TaskMetadata, TaskStatus};
use crate::storage::StorageFacade;
use executor::{DriverInput, TaskExecutor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Per-process worker state (`spec.md` §3): the agent it acts as, its
/// tunables, and a shutdown flag. Only one instance may exist per agent_id
/// process-wide — enforced by convention (one `taskhub-worker` process per
/// `AGENT_ID`), not by a lock, since workers never share memory.
pub struct WorkerRuntime {
    agent_id: String,
    storage: Arc<dyn StorageFacade>,
    executor: Arc<dyn TaskExecutor>,
    poll_interval: Duration,
    task_timeout: Duration,
    heartbeat_interval: Duration,
    shutdown_grace: Duration,
    response_write_retries: u32,
    workdir_root: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl WorkerRuntime {
    pub fn new(config: &Config, storage: Arc<dyn StorageFacade>, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        let raw_agent_id = config
            .worker
            .agent_id
            .clone()
            .ok_or_else(|| HubError::Configuration("AGENT_ID is required to run a worker".to_string()))?;

        Ok(Self {
            agent_id: normalize_agent_id(&raw_agent_id),
            storage,
            executor,
            poll_interval: Duration::from_secs(config.worker.poll_interval_secs),
            task_timeout: Duration::from_secs(config.worker.task_timeout_secs),
            heartbeat_interval: Duration::from_secs(config.worker.heartbeat_interval_secs),
            shutdown_grace: Duration::from_secs(config.worker.shutdown_grace_secs),
            response_write_retries: config.worker.response_write_retries,
            workdir_root: config.worker.workdir_root.clone(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Idle → claim → execute → finalize, until shutdown is observed.
    pub async fn run(&self) {
        info!(agent_id = %self.agent_id, "worker loop starting");
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!(agent_id = %self.agent_id, "shutdown flag observed in idle, exiting");
                return;
            }

            match self.storage.claim_next_pending(&self.agent_id).await {
                Ok(Some(task)) => {
                    if let Err(e) = self.process_task(task).await {
                        error!(agent_id = %self.agent_id, error = %e, "task processing failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = wait_for_shutdown(&self.shutdown) => {}
                    }
                }
                Err(e) => {
                    warn!(agent_id = %self.agent_id, error = %e, "claim_next_pending failed, backing off");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process_task(&self, task: Task) -> Result<()> {
        let task_id = task.task_id;

        // Preparing
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
        let workdir = self.workdir_root.join(&self.agent_id).join(task_id.to_string()).join(&timestamp);
        let screenshots_dir = workdir.join("screenshots");
        if let Err(e) = tokio::fs::create_dir_all(&screenshots_dir).await {
            // Infra failure before the task is even running: leave it `assigned`
            // so the sweeper resets it rather than dead-lettering a transient error.
            error!(task_id, error = %e, "failed to create workdir, leaving task assigned for sweeper");
            return Err(HubError::StorageUnavailable(format!("workdir creation failed: {e}")));
        }

        if let Err(e) = self.storage.append_progress(task_id, &self.agent_id, Some(0.0), "task picked up", None).await {
            error!(task_id, error = %e, "failed to append pickup progress, leaving task assigned for sweeper");
            return Err(e);
        }
        self.storage
            .update_task_status(task_id, TaskStatus::InProgress, Some(&self.agent_id), None)
            .await?;

        // Running, racing the progress pump against the driver call.
        let last_percent = Arc::new(Mutex::new(0.0_f64));
        let pump_storage = self.storage.clone();
        let pump_agent = self.agent_id.clone();
        let pump_percent = last_percent.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let pump = tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                let percent = *pump_percent.lock().await;
                if let Err(e) = pump_storage
                    .append_progress(task_id, &pump_agent, Some(percent), "heartbeat", None)
                    .await
                {
                    warn!(task_id, error = %e, "heartbeat progress append failed");
                }
            }
        });

        let storage = self.storage.clone();
        let cancel_poll = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                match storage.get_task(task_id).await {
                    Ok(t) if t.status == TaskStatus::Cancelled => return,
                    _ => continue,
                }
            }
        });

        let driver_future = self.executor.execute(DriverInput {
            task_text: &task.description,
            workdir: &workdir,
            timeout: self.task_timeout,
        });

        let outcome = tokio::select! {
            result = driver_future => Outcome::Driver(result),
            _ = cancel_poll => Outcome::Cancelled,
        };
        pump.abort();

        match outcome {
            Outcome::Driver(Ok(output)) => {
                self.upload_screenshots(task_id, &screenshots_dir).await;
                let response = executor::extract_response(&output.stdout);
                self.finalize(task_id, TaskStatus::Completed, "completed", Some(response), None).await
            }
            Outcome::Driver(Err(HubError::ExecutionTimeout(_))) => {
                self.finalize(task_id, TaskStatus::Failed, "failed: timeout", None, Some("driver timed out".to_string())).await
            }
            Outcome::Driver(Err(e)) => {
                self.finalize(task_id, TaskStatus::Failed, &format!("failed: {e}"), None, Some(e.to_string())).await
            }
            Outcome::Cancelled => {
                // Dropping `driver_future` here kills the child (kill_on_drop)
                // within the grace period implied by the poll interval above.
                self.finalize(task_id, TaskStatus::Cancelled, "failed: cancelled", None, Some("cancelled".to_string())).await
            }
        }
    }

    /// Diffs `screenshots_dir` (it starts empty per `Preparing`, so every
    /// entry found here is new) and uploads each file; best-effort per file.
    async fn upload_screenshots(&self, task_id: i64, screenshots_dir: &std::path::Path) {
        let mut entries = match tokio::fs::read_dir(screenshots_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(task_id, error = %e, "could not read screenshots dir");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else { continue };
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(task_id, path = %path.display(), error = %e, "failed to read screenshot, skipping");
                    continue;
                }
            };
            let object_path = format!("{}/{}.{ext}", self.agent_id, uuid::Uuid::new_v4());
            let content_type = content_type_for_ext(ext);

            if let Err(e) = self
                .storage
                .upload_object(crate::constants::BUCKET_SCREENSHOTS, &object_path, bytes.clone(), content_type)
                .await
            {
                warn!(task_id, object_path, error = %e, "screenshot upload failed, skipping");
                continue;
            }

            if let Err(e) = self
                .storage
                .register_artifact(
                    &self.agent_id,
                    Some(task_id),
                    crate::constants::BUCKET_SCREENSHOTS,
                    &object_path,
                    content_type,
                    bytes.len() as i64,
                    serde_json::json!({}),
                )
                .await
            {
                warn!(task_id, object_path, error = %e, "artifact registration failed");
                continue;
            }

            let _ = self
                .storage
                .append_progress(task_id, &self.agent_id, None, &format!("uploaded screenshot: {object_path}"), None)
                .await;
        }
    }

    async fn finalize(
        &self,
        task_id: i64,
        status: TaskStatus,
        message: &str,
        response: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let result = if let Some(ref response) = response {
            TaskExecutionResult::Success { output: response.clone(), screenshots_uploaded: 0 }
        } else {
            TaskExecutionResult::Failure { error: error.clone().unwrap_or_default(), kind: None }
        };

        let metadata = TaskMetadata {
            response,
            response_updated_at: Some(chrono::Utc::now()),
            last_agent: Some(self.agent_id.clone()),
            result: Some(result),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            match self
                .storage
                .update_task_status(task_id, status, Some(&self.agent_id), Some(metadata.clone()))
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < self.response_write_retries => {
                    attempt += 1;
                    warn!(task_id, attempt, error = %e, "final response write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                }
                Err(e) => {
                    error!(task_id, error = %e, "response persistence failed after retries, marking failed");
                    let _ = self
                        .storage
                        .append_progress(task_id, &self.agent_id, Some(100.0), "response persistence failed", None)
                        .await;
                    let _ = self
                        .storage
                        .update_task_status(task_id, TaskStatus::Failed, Some(&self.agent_id), None)
                        .await;
                    return Err(e);
                }
            }
        }

        self.storage
            .append_progress(task_id, &self.agent_id, Some(100.0), message, None)
            .await?;
        Ok(())
    }
}

enum Outcome {
    Driver(Result<executor::DriverOutput>),
    Cancelled,
}

async fn wait_for_shutdown(flag: &AtomicBool) {
    loop {
        if flag.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn content_type_for_ext(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Installs a SIGINT/SIGTERM handler that flips `shutdown`, then waits up to
/// `grace` for the current task to finish before returning, matching the
/// teacher's shutdown-vs-processing `tokio::select!` race in `main.rs`.
pub async fn install_shutdown_handler(shutdown: Arc<AtomicBool>, grace: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, setting flag");
    shutdown.store(true, Ordering::Relaxed);
    tokio::time::sleep(grace).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_maps_known_extensions() {
        assert_eq!(content_type_for_ext("PNG"), "image/png");
        assert_eq!(content_type_for_ext("bin"), "application/octet-stream");
    }
}
