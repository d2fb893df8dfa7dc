//! Termination signal listener
//!
//! Runs beside the pipeline and only releases resources: it never touches pipeline
//! state. It starts as soon as the run lock is held; the pool is handed over through
//! a [`PoolSlot`] once connected. Closing the pool waits for the statement in
//! flight to return before the process exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::info;

use crate::db::Database;
use crate::lock::remove_pid_file;

/// The connected database, empty until startup gets that far.
pub type PoolSlot = Arc<OnceCell<Database>>;

/// Waits for SIGTERM, SIGINT or SIGQUIT.
#[cfg(unix)]
async fn wait_for_termination() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_termination() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

/// Closes the pool if one was connected, then removes the PID file.
async fn release_resources(pool: &OnceCell<Database>, pid_file: &Path) {
    if let Some(db) = pool.get() {
        db.close().await;
    }
    remove_pid_file(pid_file);
}

/// Spawns the listener. On a termination signal it releases what startup has
/// acquired so far and exits with status 0.
pub fn spawn_listener(pool: PoolSlot, pid_file: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(signal) => {
                info!(signal, "Termination requested, releasing resources");
                release_resources(&pool, &pid_file).await;
                info!("Shutting down");
                std::process::exit(0);
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot install signal handlers; shutdown cleanup disabled");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn releases_pid_file_before_the_pool_exists() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run.pid");
        std::fs::write(&pid_file, "1").unwrap();

        release_resources(&OnceCell::new(), &pid_file).await;
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn closes_a_connected_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run.pid");
        std::fs::write(&pid_file, "1").unwrap();

        let slot: PoolSlot = Arc::new(OnceCell::new());
        slot.set(Database::in_memory().await).ok();
        release_resources(&slot, &pid_file).await;

        assert!(slot.get().unwrap().pool().is_closed());
        assert!(!pid_file.exists());
    }
}
