//! System-wide tunables for the orchestration hub and workers.
//! Most of these are overridable via environment variables in `config::Config`;
//! the values here are the defaults applied when a variable is unset.

// Claim protocol / worker loop (C5, C6)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STALE_TASK_GRACE_SECS: u64 = 600;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 60;
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 10;
pub const DEFAULT_RESPONSE_WRITE_RETRIES: u32 = 3;

// Response extraction (C6 Finalize)
pub const AGENT_RESPONSE_START: &str = "AGENT_RESPONSE_START";
pub const AGENT_RESPONSE_END: &str = "AGENT_RESPONSE_END";
pub const STDOUT_TAIL_BYTES: usize = 64 * 1024;

// Hub API (C8)
pub const DEFAULT_WORKER_COUNT: u32 = 3;
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 3000;
pub const TASK_TITLE_MAX_CHARS: usize = 80;
pub const MAX_TASK_CONTENT_LENGTH: usize = 10_000;

// Object store (C2) path policy
pub const BUCKET_SCREENSHOTS: &str = "screenshots";
pub const BUCKET_BINARIES: &str = "binaries";

// Circuit breaker around the driver (C7)
pub const DRIVER_FAILURE_THRESHOLD: u32 = 5;
pub const DRIVER_CIRCUIT_COOLDOWN_SECS: u64 = 60;
