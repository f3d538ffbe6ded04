//! Cross-process mutual exclusion for a store directory.

use crate::error::{IpamError, Result};
use log::debug;
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::File;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Exclusive `flock(2)` on a store's lock file
///
/// The lock is held for the lifetime of the value. Dropping it (including
/// during unwinding) releases the lock; [`StoreLock::release`] does the same
/// but reports unlock failures.
#[must_use]
pub struct StoreLock {
    path: PathBuf,
    flock: Flock<File>,
}

impl StoreLock {
    /// Open (creating if needed) `path` and block until an exclusive lock is held
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)
            .map_err(|e| IpamError::store(path, e))?;

        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| IpamError::Lock {
            path: path.to_path_buf(),
            source: errno,
        })?;

        debug!("Acquired store lock {:?}", path);
        Ok(StoreLock {
            path: path.to_path_buf(),
            flock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly
    pub fn release(self) -> Result<()> {
        let StoreLock { path, flock } = self;
        flock
            .unlock()
            .map(drop)
            .map_err(|(_, errno)| IpamError::Lock {
                path: path.clone(),
                source: errno,
            })?;
        debug!("Released store lock {:?}", path);
        Ok(())
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLock").field("path", &self.path).finish_non_exhaustive()
    }
}
