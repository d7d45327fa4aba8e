//! `taskhub-worker` — one process per `AGENT_ID`, running the Worker Loop
//! (C6) against the shared Storage Façade. Mirrors the teacher's separate
//! `[[bin]]` targets (`discord-bot`, `run_phase2`) sharing one library
//! crate.

use std::sync::Arc;
use taskhub_core::config::Config;
use taskhub_core::storage::Storage;
use taskhub_core::worker::executor::ProcessDriverExecutor;
use taskhub_core::worker::{install_shutdown_handler, WorkerRuntime};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let driver_command = match &config.worker.driver_command {
        Some(cmd) => cmd.clone(),
        None => {
            eprintln!("configuration error: DRIVER_COMMAND is required to run a worker");
            std::process::exit(1);
        }
    };

    let storage = match Storage::connect(&config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("storage unavailable: {e}");
            std::process::exit(2);
        }
    };

    let executor = Arc::new(ProcessDriverExecutor::new(driver_command));
    let runtime = match WorkerRuntime::new(&config, storage, executor) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!("worker starting");
    let shutdown_flag = runtime.shutdown_handle();
    let shutdown_grace = std::time::Duration::from_secs(config.worker.shutdown_grace_secs);

    tokio::select! {
        _ = runtime.run() => {}
        _ = install_shutdown_handler(shutdown_flag, shutdown_grace) => {
            error!("forced shutdown after grace period");
            std::process::exit(130);
        }
    }

    Ok(())
}
