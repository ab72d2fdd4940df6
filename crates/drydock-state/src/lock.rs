//! Environment-scoped deployment lock.
//!
//! One deployment attempt per (environment, host) at a time, enforced
//! with an exclusive advisory file lock taken before the controller
//! starts. The lock lives outside the controller on purpose: the
//! controller assumes it is the sole writer to backup and process
//! state and never re-checks.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{StateError, StateResult};

/// Held for the duration of one deployment attempt; released on drop.
#[derive(Debug)]
pub struct EnvironmentLock {
    file: File,
    path: PathBuf,
}

impl EnvironmentLock {
    /// Acquire the lock for (environment, host), failing fast if
    /// another attempt holds it.
    pub fn try_acquire(state_dir: &Path, environment: &str, host: &str) -> StateResult<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(format!("{environment}-{host}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| StateError::Locked(format!("{environment}/{host}")))?;

        debug!(?path, "environment lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EnvironmentLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = ?self.path, "environment lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();

        let _held = EnvironmentLock::try_acquire(dir.path(), "production", "web-1").unwrap();
        let err = EnvironmentLock::try_acquire(dir.path(), "production", "web-1").unwrap_err();
        assert!(matches!(err, StateError::Locked(_)));
        assert!(err.to_string().contains("production/web-1"));
    }

    #[test]
    fn different_targets_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();

        let _prod = EnvironmentLock::try_acquire(dir.path(), "production", "web-1").unwrap();
        let _dev = EnvironmentLock::try_acquire(dir.path(), "development", "web-1").unwrap();
        let _other_host = EnvironmentLock::try_acquire(dir.path(), "production", "web-2").unwrap();
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        {
            let _held = EnvironmentLock::try_acquire(dir.path(), "development", "web-1").unwrap();
        }
        // Reacquire after drop succeeds.
        let _again = EnvironmentLock::try_acquire(dir.path(), "development", "web-1").unwrap();
    }

    #[test]
    fn creates_state_dir_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("state/locks");

        let lock = EnvironmentLock::try_acquire(&nested, "development", "web-1").unwrap();
        assert!(lock.path().starts_with(&nested));
    }
}
