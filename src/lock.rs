// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exclusive run lock.
//!
//! The recipe tree, the sandbox, and the package index are all mutated in
//! place. Two runs interleaving their mutations would corrupt all three, so
//! at most one run may be in flight at any time. The lock is a plain file
//! created with create-new semantics; whoever manages to create it owns the
//! run, and removes it again once done.
//!
//! A run that crashes hard leaves the lock file behind. Remove it by hand
//! after making sure no run is active.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Name of lock file inside the output directory.
pub const LOCK_FILE_NAME: &str = ".pkgrepo.lock";

/// Held run lock, released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire run lock inside directory `dir`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Busy`] if another run holds the lock.
    /// - Return [`LockError::Create`] if the lock file cannot be created.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE_NAME);
        let create_error = |source| LockError::Create {
            path: path.clone(),
            source,
        };

        mkdirp::mkdirp(dir.as_ref()).map_err(create_error)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(LockError::Busy { path: path.clone() });
            }
            Err(err) => return Err(create_error(err)),
        };

        // INVARIANT: Record owner for whoever has to clean up a stale lock.
        writeln!(file, "{}", std::process::id()).map_err(create_error)?;
        debug!("acquired run lock {:?}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released run lock {:?}", self.path.display()),
            Err(err) => warn!("failed to release run lock {:?}: {err}", self.path.display()),
        }
    }
}

/// Run lock error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another run is in flight.
    #[error("another run is in progress, lock held at {:?}", path.display())]
    Busy { path: PathBuf },

    /// Lock file cannot be created.
    #[error("failed to create lock file {:?}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_is_rejected_until_release() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("www").join("pkgrepo");

        let first = RunLock::acquire(&output)?;
        assert!(first.path().exists());
        assert!(matches!(RunLock::acquire(&output), Err(LockError::Busy { .. })));

        drop(first);
        assert!(!output.join(LOCK_FILE_NAME).exists());
        let _second = RunLock::acquire(&output)?;

        Ok(())
    }
}
