//! `taskhub` — the Hub API process (C8): owns the Storage Façade and runs
//! the claim-protocol sweeper (C5) on a timer alongside the HTTP server,
//! racing them the way the teacher's `main.rs` raced the orchestrator
//! against the API server.

use std::sync::Arc;
use taskhub_core::{api::ApiServer, config::Config, storage::Storage};
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

    info!("starting task hub API");

    let storage = match Storage::connect(&config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("storage unavailable: {e}");
            std::process::exit(2);
        }
    };

    let api_server = ApiServer::new(&config, storage.clone())?;
    let sweep_interval = std::time::Duration::from_secs(config.worker.poll_interval_secs.max(5));
    let sweep_grace = taskhub_core::storage::default_sweep_grace(config.worker.task_timeout_secs);

    let sweeper = {
        let storage = storage.clone();
        tokio::spawn(async move {
            use taskhub_core::storage::StorageFacade;
            loop {
                tokio::time::sleep(sweep_interval).await;
                match storage.sweep_stale_tasks(sweep_grace).await {
                    Ok(reset) if reset > 0 => info!(reset, "sweeper reset stale tasks"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "sweeper pass failed"),
                }
            }
        })
    };

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                error!("hub API failed: {e}");
            }
        }
        _ = sweeper => {}
    }

    Ok(())
}
