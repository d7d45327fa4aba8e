use thiserror::Error;

/// Convenience type alias for Results with HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Main error type for the task orchestration hub
///
/// Every error surfaced by the Storage Façade, the claim protocol, the
/// worker loop, or the Hub API funnels through one of these variants so
/// that `src/api/mod.rs` has a single place to map errors onto HTTP status
/// codes.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(std::time::Duration),

    #[error("driver execution error ({kind}): {message}")]
    ExecutionError {
        kind: ExecutionErrorKind,
        message: String,
    },

    #[error("worker shutdown interrupted current task")]
    ShutdownInterrupted,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("relational store error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("log store error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    DriverInit,
    DriverRuntime,
    DriverAuth,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionErrorKind::DriverInit => "driver_init",
            ExecutionErrorKind::DriverRuntime => "driver_runtime",
            ExecutionErrorKind::DriverAuth => "driver_auth",
        };
        write!(f, "{s}")
    }
}
