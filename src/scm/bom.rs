use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::bom::Bom;
use crate::error::{Error, Result};
use crate::git::GitRunner;
use crate::repository::RepositorySpec;
use crate::scm::{LocalDirLocks, SourceCodeManager};

/// Resolves repositories and their pinned commits from a BOM.
///
/// The BOM is ground truth. A clone at the wrong commit is treated as local
/// staleness and checked out again by `ensure_local_repository`. Asking
/// `check_repository_is_current` about a stale clone is an error, since
/// only synchronization is allowed to move a pinned clone.
pub struct BomSourceCodeManager {
    root_dir: PathBuf,
    git: GitRunner,
    bom: Bom,
    repository_names: Vec<String>,
    locks: LocalDirLocks,
}

impl BomSourceCodeManager {
    /// An empty `repository_names` selects every service with a commit.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        git: GitRunner,
        bom: Bom,
        repository_names: Vec<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            git,
            bom,
            repository_names,
            locks: LocalDirLocks::new(),
        }
    }

    pub fn bom(&self) -> &Bom {
        &self.bom
    }

    fn pinned_commit<'a>(&self, spec: &'a RepositorySpec) -> Result<&'a str> {
        spec.commit_id.as_deref().ok_or_else(|| {
            Error::unexpected(format!("{} has no pinned commit", spec.name))
        })
    }
}

impl SourceCodeManager for BomSourceCodeManager {
    fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn git(&self) -> &GitRunner {
        &self.git
    }

    fn determine_source_repositories(&self) -> Result<Vec<RepositorySpec>> {
        let names: Vec<String> = if self.repository_names.is_empty() {
            self.bom
                .services
                .iter()
                .filter(|(_, entry)| entry.commit.is_some())
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            self.repository_names.clone()
        };

        names
            .iter()
            .map(|name| {
                Ok(RepositorySpec::new(name.as_str(), self.local_dir_for(name))
                    .with_origin(self.bom.origin_for(name)?)
                    .with_commit(self.bom.commit_for(name)?))
            })
            .collect()
    }

    fn ensure_local_repository(&self, spec: &RepositorySpec) -> Result<()> {
        let _guard = self.locks.acquire(&spec.git_dir)?;
        let commit = self.pinned_commit(spec)?;

        if !spec.git_dir.exists() {
            return self.git.clone_repository_to_path(spec, Some(commit), None, None);
        }

        let have = self.git.query_local_repository_commit_id(&spec.git_dir)?;
        if have == commit {
            debug!("{} is already at {}", spec.git_dir.display(), commit);
            return Ok(());
        }

        warn!(
            "Repository {} is at commit {} instead of the BOM's {}, checking out {}",
            spec.git_dir.display(),
            have,
            commit,
            commit
        );
        self.git.checkout(&spec.git_dir, commit)?;
        self.check_repository_is_current(spec).map(|_| ())
    }

    fn determine_build_number(&self, spec: &RepositorySpec) -> Result<String> {
        self.bom.build_number_for(&spec.name)
    }

    fn check_repository_is_current(&self, spec: &RepositorySpec) -> Result<bool> {
        let commit = self.pinned_commit(spec)?;
        let have = self.git.query_local_repository_commit_id(&spec.git_dir)?;
        if have != commit {
            return Err(Error::config(format!(
                "Repository {} is at commit {} but the BOM pins {}",
                spec.git_dir.display(),
                have,
                commit
            )));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOM: &str = r#"
version: master-20180101000000
artifactSources:
  gitPrefix: https://github.com/acme
services:
  gate:
    version: 1.2.3-20180101000000
    commit: 1111111111111111111111111111111111111111
  echo:
    version: 2.0.0-20180102000000
    commit: 2222222222222222222222222222222222222222
    gitPrefix: https://github.com/fork
  monitoring-third-party:
    version: 0.5.0-20180101000000
"#;

    fn manager(names: &[&str]) -> BomSourceCodeManager {
        BomSourceCodeManager::new(
            "/tmp/source_code/fetch_source",
            GitRunner::default(),
            Bom::from_yaml(BOM).unwrap(),
            names.iter().map(|name| name.to_string()).collect(),
        )
    }

    #[test]
    fn test_specs_are_pinned() {
        let specs = manager(&["gate", "echo"]).determine_source_repositories().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0].commit_id.as_deref(),
            Some("1111111111111111111111111111111111111111")
        );
        assert_eq!(specs[0].origin.as_deref(), Some("https://github.com/acme/gate"));
        assert_eq!(specs[1].origin.as_deref(), Some("https://github.com/fork/echo"));
        assert_eq!(specs[1].branch, None);
    }

    #[test]
    fn test_empty_names_selects_services_with_commits() {
        let specs = manager(&[]).determine_source_repositories().unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "gate"]);
    }

    #[test]
    fn test_name_missing_from_bom_is_unexpected() {
        let err = manager(&["gate", "fiat"])
            .determine_source_repositories()
            .unwrap_err();
        assert_eq!(err.classification(), "UnexpectedError");
    }

    #[test]
    fn test_build_number_from_service_version() {
        let scm = manager(&["echo"]);
        let spec = RepositorySpec::new("echo", "/tmp/echo");
        assert_eq!(scm.determine_build_number(&spec).unwrap(), "20180102000000");
    }
}
