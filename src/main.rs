//! squid-fetch - Incremental loader for Squid access logs
//!
//! Reads the access log once per run and loads what is new into the reporting
//! database:
//! - staging rows for lines newer than the last loaded fact
//! - ip address, login and status dimensions
//! - the fact table and hourly per-site rollups
//! - one run log row per run

mod cli;
mod config;
mod db;
mod domain;
mod error;
mod lock;
mod logging;
mod model;
mod parser;
mod pipeline;
mod shutdown;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use crate::lock::RunLock;
use crate::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = config::Config::load(&cli)?;

    logging::init_logging(&config.logging.level);
    info!("Starting squid-fetch...");

    let lock = RunLock::acquire(
        &config.lock.pid_file,
        Duration::from_secs(config.lock.stale_after_secs),
    )?;
    let pool_slot = shutdown::PoolSlot::default();
    shutdown::spawn_listener(pool_slot.clone(), lock.path().to_path_buf());

    // Initialize database
    let db = match db::Database::new(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Database unavailable");
            lock.release();
            return Err(e.into());
        }
    };
    let _ = pool_slot.set(db.clone());
    if let Err(e) = db.run_migrations().await {
        error!(error = %e, "Failed to prepare schema");
        db.close().await;
        lock.release();
        return Err(e.into());
    }
    info!(driver = ?db.dialect(), "Database initialized");

    let input = match pipeline::open_log(&config.ingest.log_file).await {
        Ok(input) => input,
        Err(e) => {
            db.close().await;
            lock.release();
            return Err(e).with_context(|| {
                format!("cannot open log file {}", config.ingest.log_file.display())
            });
        }
    };
    info!(log_file = %config.ingest.log_file.display(), "Reading log file");

    let outcome = Pipeline::new(&db, &config.ingest).run(input).await;

    db.close().await;
    lock.release();

    let stats = outcome?;
    info!(
        lines_read = stats.lines_read,
        lines_added = stats.lines_added,
        "Done"
    );
    Ok(())
}
