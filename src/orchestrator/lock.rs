//! Working-directory lock file (§5 "Shared-resource policy"): an advisory `flock`
//! acquired with a short timeout at engine start, preventing two orchestrations from
//! running against the same tree concurrently. Releasing it is part of cleanup.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{OrchestratorError, Result};

/// Held advisory lock on `.orchestrator.lock`. Dropping or calling `release` frees it.
pub struct WorkdirLock {
    path: PathBuf,
    file: Option<File>,
}

impl WorkdirLock {
    /// Acquire the lock at `<workdir>/.orchestrator.lock`, retrying briefly until
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeUnreachable` if the lock is still held by another process after
    /// `timeout`.
    pub fn acquire(workdir: &Path, timeout: Duration) -> Result<Self> {
        let path = workdir.join(".orchestrator.lock");
        let file = File::create(&path)?;
        let deadline = Instant::now() + timeout;

        loop {
            if try_lock(&file) {
                return Ok(Self {
                    path,
                    file: Some(file),
                });
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::runtime_unreachable(format!(
                    "could not acquire {} within {timeout:?}; another orchestration may be running",
                    path.display()
                )));
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Release the lock and remove the lock file. Tolerant of being called more than
    /// once (the second call is a no-op), matching the cleanup registry's contract.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            unlock(&file);
            drop(file);
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is valid for the lifetime of this call; LOCK_EX | LOCK_NB never blocks.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    rc == 0
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is valid; LOCK_UN on an already-unlocked fd is a documented no-op.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> bool {
    true
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
