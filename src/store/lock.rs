use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SbsError};

/// Default number of acquisition attempts before giving up.
pub const LOCK_ATTEMPTS: u32 = 10;

/// Delay between acquisition attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Mutual exclusion by atomic directory creation.
///
/// `mkdir` either creates the directory or fails because it already exists,
/// atomically, on every filesystem sbs cares about. The lock is released by
/// removing the directory, which the guard does on drop so every exit path
/// releases it. A crashed holder leaves a stale directory behind; sbs does
/// not try to break such locks.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Acquire the lock named `name` under `root`, retrying once per second
    /// up to [`LOCK_ATTEMPTS`] times.
    pub fn acquire(root: &Path, name: &str) -> Result<Self> {
        Self::acquire_with(root, name, LOCK_ATTEMPTS, LOCK_RETRY_DELAY)
    }

    /// Acquire with explicit retry parameters. Tests shrink these.
    pub fn acquire_with(root: &Path, name: &str, attempts: u32, delay: Duration) -> Result<Self> {
        let path = root.join(name);
        for attempt in 1..=attempts {
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(lock = name, attempt, "Lock busy, retrying");
                    if attempt < attempts {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SbsError::LockUnavailable(name.to_string()))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}
