use crate::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level configuration, assembled once at process start and shared
/// (cloned, it's cheap) between the Hub API and Worker Loop binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub objects: ObjectStoreConfig,
    pub mongo: MongoConfig,
    pub api: ApiConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub worker_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Raw `AGENT_ID` as given; normalize via `models::normalize_agent_id` at
    /// every point that needs the canonical form (see §4.2 path policy).
    pub agent_id: Option<String>,
    pub driver_command: Option<String>,
    pub poll_interval_secs: u64,
    pub task_timeout_secs: u64,
    pub stale_task_grace_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    pub response_write_retries: u32,
    pub workdir_root: std::path::PathBuf,
}

impl Config {
    /// Loads configuration from the environment (optionally from a `.env`
    /// file first), validating the values that are required for the
    /// process to run at all. Values only needed by one binary (e.g.
    /// `AGENT_ID` for the worker) are optional here and validated by that
    /// binary's `main` instead, matching `spec.md` §6.2's per-process
    /// requirement split.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {}", e),
        }

        let postgres_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("POSTGRES_DSN"))
            .map_err(|_| {
                HubError::Configuration(
                    "POSTGRES_URL (or POSTGRES_DSN) environment variable is required".to_string(),
                )
            })?;

        let mongo_url = env::var("MONGODB_URL").map_err(|_| {
            HubError::Configuration("MONGODB_URL environment variable is required".to_string())
        })?;

        let endpoint = env::var("MINIO_ENDPOINT").map_err(|_| {
            HubError::Configuration("MINIO_ENDPOINT environment variable is required".to_string())
        })?;
        let access_key = env::var("MINIO_ACCESS_KEY").map_err(|_| {
            HubError::Configuration(
                "MINIO_ACCESS_KEY environment variable is required".to_string(),
            )
        })?;
        let secret_key = env::var("MINIO_SECRET_KEY").map_err(|_| {
            HubError::Configuration(
                "MINIO_SECRET_KEY environment variable is required".to_string(),
            )
        })?;
        let secure = env::var("MINIO_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let api_key = env::var("API_KEY").ok();
        match &api_key {
            Some(key) if key.trim().is_empty() => {
                return Err(HubError::Configuration(
                    "API_KEY cannot be blank".to_string(),
                ));
            }
            Some(key) if key.len() < 32 => {
                return Err(HubError::Configuration(
                    "API_KEY must be at least 32 characters".to_string(),
                ));
            }
            _ => {}
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("API_HOST")
                .unwrap_or_else(|_| crate::constants::DEFAULT_API_HOST.to_string()),
            port: parse_env_or("API_PORT", crate::constants::DEFAULT_API_PORT),
            api_key,
            allowed_origins,
            worker_count: parse_env_or("WORKER_COUNT", crate::constants::DEFAULT_WORKER_COUNT),
        };

        let workdir_root = env::var("WORKDIR_ROOT")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let worker = WorkerConfig {
            agent_id: env::var("AGENT_ID").ok(),
            driver_command: env::var("DRIVER_COMMAND").ok(),
            poll_interval_secs: parse_env_or(
                "POLL_INTERVAL_SECONDS",
                crate::constants::DEFAULT_POLL_INTERVAL_SECS,
            ),
            task_timeout_secs: parse_env_or(
                "RUN_TASK_TIMEOUT_SECONDS",
                crate::constants::DEFAULT_TASK_TIMEOUT_SECS,
            ),
            stale_task_grace_secs: parse_env_or(
                "STALE_TASK_GRACE_SECONDS",
                crate::constants::DEFAULT_STALE_TASK_GRACE_SECS,
            ),
            heartbeat_interval_secs: parse_env_or(
                "HEARTBEAT_INTERVAL_SECONDS",
                crate::constants::DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ),
            shutdown_grace_secs: parse_env_or(
                "SHUTDOWN_GRACE_SECONDS",
                crate::constants::DEFAULT_SHUTDOWN_GRACE_SECS,
            ),
            response_write_retries: parse_env_or(
                "RESPONSE_WRITE_RETRIES",
                crate::constants::DEFAULT_RESPONSE_WRITE_RETRIES,
            ),
            workdir_root,
        };

        Ok(Config {
            postgres: PostgresConfig { url: postgres_url },
            objects: ObjectStoreConfig {
                endpoint,
                access_key,
                secret_key,
                secure,
            },
            mongo: MongoConfig { url: mongo_url },
            api,
            worker,
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_or_falls_back_on_missing_or_bad_value() {
        std::env::remove_var("TASKHUB_TEST_VALUE");
        let v: u64 = parse_env_or("TASKHUB_TEST_VALUE", 42);
        assert_eq!(v, 42);
    }
}
