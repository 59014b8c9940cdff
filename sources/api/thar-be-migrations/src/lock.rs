//! The system-wide migration lock.  Whoever holds it owns the current migration slot.
//!
//! The lock is an exclusive advisory lock on a file.  It is never waited for: a caller that
//! can't get it right away fails.  The kernel drops it when the holder exits, so a crashed run
//! doesn't leave it behind.

use crate::error::{self, Result};
use fs2::FileExt;
use log::{debug, warn};
use snafu::ResultExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MigrationLock {
    path: PathBuf,
}

impl MigrationLock {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock, or fails with [`error::Error::MigrationLockHeld`] if anyone has it.
    pub fn try_acquire(&self) -> Result<LockGuard> {
        let file = self.open()?;
        file.try_lock_exclusive()
            .context(error::MigrationLockHeldSnafu { path: &self.path })?;
        debug!("Obtained migration lock '{}'", self.path.display());
        Ok(LockGuard { file })
    }

    /// Whether some process holds the lock right now.
    pub fn is_held(&self) -> Result<bool> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                FileExt::unlock(&file).context(error::LockFileSnafu { path: &self.path })?;
                Ok(false)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(true),
            Err(e) => Err(e).context(error::LockFileSnafu { path: &self.path }),
        }
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(error::CreateDirectorySnafu { path: parent })?;
            }
        }
        File::create(&self.path).context(error::LockFileSnafu { path: &self.path })
    }
}

/// Holds the migration lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release migration lock: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let lock = MigrationLock::new(dir.path().join("run/migration.lock"));
        assert!(!lock.is_held().unwrap());

        let guard = lock.try_acquire().unwrap();
        assert!(lock.is_held().unwrap());
        assert!(matches!(
            lock.try_acquire(),
            Err(error::Error::MigrationLockHeld { .. })
        ));

        drop(guard);
        assert!(!lock.is_held().unwrap());
        lock.try_acquire().unwrap();
    }
}
