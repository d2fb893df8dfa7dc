//! Single-instance guard backed by a PID file

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::LockError;

/// Held for the lifetime of a run; the file is removed by [`RunLock::release`].
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Writes the current PID to `path`.
    ///
    /// Fails when another run's file exists and is younger than `stale_after`; an
    /// older file is assumed to belong to a dead process and is taken over.
    pub fn acquire(path: impl AsRef<Path>, stale_after: Duration) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LockError::Io {
            path: path.display().to_string(),
            source,
        };

        match fs::metadata(&path) {
            Ok(meta) => {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .unwrap_or_default();
                let pid = fs::read_to_string(&path).unwrap_or_default().trim().to_string();

                if age < stale_after {
                    return Err(LockError::AlreadyRunning {
                        path: path.display().to_string(),
                        pid,
                        age_secs: age.as_secs(),
                    });
                }
                warn!(
                    pid_file = %path.display(),
                    pid = %pid,
                    age_secs = age.as_secs(),
                    "Taking over stale pid file"
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        fs::write(&path, std::process::id().to_string()).map_err(io_err)?;
        debug!(pid_file = %path.display(), "PID file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the PID file (best-effort).
    pub fn release(self) {
        remove_pid_file(&self.path);
    }
}

/// Removes a PID file, logging instead of failing.
pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(pid_file = %path.display(), "PID file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(pid_file = %path.display(), error = %e, "Failed to remove pid file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.pid");

        let lock = RunLock::acquire(&path, Duration::from_secs(900)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );

        let err = RunLock::acquire(&path, Duration::from_secs(900)).unwrap_err();
        assert!(matches!(err, LockError::AlreadyRunning { .. }));

        lock.release();
        assert!(!path.exists());
        RunLock::acquire(&path, Duration::from_secs(900)).unwrap().release();
    }

    #[test]
    fn stale_file_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.pid");
        fs::write(&path, "999999").unwrap();

        let lock = RunLock::acquire(&path, Duration::ZERO).unwrap();
        assert_eq!(
            fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn unwritable_location_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.pid");
        assert!(matches!(
            RunLock::acquire(&path, Duration::from_secs(1)),
            Err(LockError::Io { .. })
        ));
    }
}
