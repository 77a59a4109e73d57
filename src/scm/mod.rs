//! # Source Code Managers
//!
//! A `SourceCodeManager` decides which repositories a command works on and
//! keeps their local clones in the expected state. There are two strategies:
//!
//! - **`BranchSourceCodeManager`** tracks one named branch across every
//!   repository, with an optional fallback branch for repositories that have
//!   not cut it. Branch mode is a moving target, so "current" means "on the
//!   right branch".
//!
//! - **`BomSourceCodeManager`** takes repositories and exact commits from a
//!   Bill of Materials. "Current" means "at exactly the pinned commit".
//!
//! Both strategies refuse to synchronize the same local directory from two
//! threads at once; see `LocalDirLocks`.

mod bom;
mod branch;

pub use bom::BomSourceCodeManager;
pub use branch::{BranchOptions, BranchSourceCodeManager};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::git::GitRunner;
use crate::repository::{local_dir_for, RepositorySpec, SourceInfo};

/// Strategy for resolving and synchronizing source repositories.
pub trait SourceCodeManager: Send + Sync {
    /// Directory the local clones live under.
    fn root_dir(&self) -> &Path;

    fn git(&self) -> &GitRunner;

    /// The repositories relevant to this invocation.
    ///
    /// Fails with a configuration error when required options are missing.
    fn determine_source_repositories(&self) -> Result<Vec<RepositorySpec>>;

    /// Make sure `spec` is cloned and in its expected state.
    ///
    /// Idempotent. Safe to call concurrently for different repositories, but
    /// a concurrent call for the same local directory fails.
    fn ensure_local_repository(&self, spec: &RepositorySpec) -> Result<()>;

    fn determine_build_number(&self, spec: &RepositorySpec) -> Result<String>;

    /// Whether the local clone is where it should be.
    fn check_repository_is_current(&self, spec: &RepositorySpec) -> Result<bool>;

    fn local_dir_for(&self, name: &str) -> PathBuf {
        local_dir_for(self.root_dir(), name)
    }

    /// The repository summary together with its build number.
    fn lookup_source_info(&self, spec: &RepositorySpec) -> Result<SourceInfo> {
        let summary = self.git().collect_repository_summary(&spec.git_dir)?;
        Ok(SourceInfo::new(self.determine_build_number(spec)?, summary))
    }
}

/// Registry of local directories currently being synchronized.
#[derive(Debug, Default)]
pub struct LocalDirLocks {
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl LocalDirLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `dir` until the returned guard is dropped.
    pub fn acquire(&self, dir: &Path) -> Result<LocalDirGuard<'_>> {
        let mut in_flight = self.in_flight.lock().map_err(|_| Error::LockPoisoned {
            context: "local directory registry".to_string(),
        })?;
        if !in_flight.insert(dir.to_path_buf()) {
            return Err(Error::unexpected(format!(
                "{} is already being synchronized by another worker",
                dir.display()
            )));
        }
        Ok(LocalDirGuard {
            locks: self,
            dir: dir.to_path_buf(),
        })
    }

    pub fn is_in_flight(&self, dir: &Path) -> bool {
        match self.in_flight.lock() {
            Ok(in_flight) => in_flight.contains(dir),
            Err(poisoned) => poisoned.into_inner().contains(dir),
        }
    }
}

/// Releases its directory from the registry when dropped.
#[derive(Debug)]
pub struct LocalDirGuard<'a> {
    locks: &'a LocalDirLocks,
    dir: PathBuf,
}

impl Drop for LocalDirGuard<'_> {
    fn drop(&mut self) {
        match self.locks.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&self.dir);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let locks = LocalDirLocks::new();
        let dir = Path::new("/tmp/source_code/gate");

        let guard = locks.acquire(dir).unwrap();
        assert!(locks.is_in_flight(dir));
        let err = locks.acquire(dir).unwrap_err();
        assert_eq!(err.classification(), "UnexpectedError");

        drop(guard);
        assert!(!locks.is_in_flight(dir));
        assert!(locks.acquire(dir).is_ok());
    }

    #[test]
    fn test_locks_are_per_directory() {
        let locks = LocalDirLocks::new();
        let _gate = locks.acquire(Path::new("/tmp/gate")).unwrap();
        let _echo = locks.acquire(Path::new("/tmp/echo")).unwrap();
        assert!(locks.is_in_flight(Path::new("/tmp/gate")));
        assert!(locks.is_in_flight(Path::new("/tmp/echo")));
    }
}
