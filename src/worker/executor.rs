//! Task Executor Adapter (C7): the only place that knows about the
//! concrete computer-use driver. Grounded in the teacher's
//! `ClaudeCodeCliClient` (`claude_code/cli_client.rs`) — spawns an external
//! process via `tokio::process::Command`, piped stdio, workspace-scoped
//! `current_dir`, wrapped in a circuit breaker — generalized from a fixed
//! `claude` binary to a configurable `DRIVER_COMMAND`.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, SharedCircuitBreaker};
use crate::error::{ExecutionErrorKind, HubError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

pub struct DriverInput<'a> {
    pub task_text: &'a str,
    pub workdir: &'a Path,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DriverOutput {
    pub stdout: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, input: DriverInput<'_>) -> Result<DriverOutput>;
}

/// Spawns `DRIVER_COMMAND` with the task text as its sole argument and the
/// working directory set to the worker's per-task `workdir`.
pub struct ProcessDriverExecutor {
    driver_command: String,
    circuit_breaker: SharedCircuitBreaker,
}

impl ProcessDriverExecutor {
    pub fn new(driver_command: String) -> Self {
        Self {
            driver_command,
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessDriverExecutor {
    async fn execute(&self, input: DriverInput<'_>) -> Result<DriverOutput> {
        if !self.circuit_breaker.should_allow_request().await {
            return Err(HubError::ExecutionError {
                kind: ExecutionErrorKind::DriverInit,
                message: "driver circuit breaker is open".to_string(),
            });
        }

        let start = std::time::Instant::now();
        let mut command = Command::new(&self.driver_command);
        command
            .arg(input.task_text)
            .current_dir(input.workdir)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.circuit_breaker.record_failure().await;
                return Err(HubError::ExecutionError {
                    kind: ExecutionErrorKind::DriverInit,
                    message: format!("failed to spawn driver command {}: {e}", self.driver_command),
                });
            }
        };

        let wait_result = tokio::time::timeout(input.timeout, child.wait_with_output()).await;

        let output = match wait_result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.circuit_breaker.record_failure().await;
                return Err(HubError::ExecutionError {
                    kind: ExecutionErrorKind::DriverRuntime,
                    message: format!("driver process error: {e}"),
                });
            }
            Err(_) => {
                self.circuit_breaker.record_failure().await;
                warn!("driver timed out after {:?}, task aborted", input.timeout);
                return Err(HubError::ExecutionTimeout(input.timeout));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            self.circuit_breaker.record_success().await;
        } else {
            self.circuit_breaker.record_failure().await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            info!(exit_code, "driver exited non-zero: {}", stderr.trim());
        }

        Ok(DriverOutput { stdout, exit_code, duration_ms })
    }
}

/// Locates the region between `AGENT_RESPONSE_START`/`AGENT_RESPONSE_END`
/// markers in `stdout`; falls back to the last `STDOUT_TAIL_BYTES` of
/// `stdout` if the markers are absent.
pub fn extract_response(stdout: &str) -> String {
    let start_marker = crate::constants::AGENT_RESPONSE_START;
    let end_marker = crate::constants::AGENT_RESPONSE_END;

    if let (Some(start), Some(end)) = (stdout.find(start_marker), stdout.find(end_marker)) {
        let content_start = start + start_marker.len();
        if content_start <= end {
            return stdout[content_start..end].trim().to_string();
        }
    }

    let bytes = stdout.as_bytes();
    let tail_start = bytes.len().saturating_sub(crate::constants::STDOUT_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[tail_start..]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_response_between_markers() {
        let stdout = "noise\nAGENT_RESPONSE_START\nhello world\nAGENT_RESPONSE_END\nmore noise";
        assert_eq!(extract_response(stdout), "hello world");
    }

    #[test]
    fn falls_back_to_tail_without_markers() {
        let stdout = "just some plain output with no markers";
        assert_eq!(extract_response(stdout), stdout);
    }
}
