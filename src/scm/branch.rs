use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::defaults;
use crate::error::{Error, Result};
use crate::git::{make_https_url, make_ssh_url, GitRunner};
use crate::repository::RepositorySpec;
use crate::scm::{LocalDirLocks, SourceCodeManager};

/// Where branch-tracked repositories come from and which branch they track.
#[derive(Debug, Clone)]
pub struct BranchOptions {
    pub git_branch: Option<String>,
    /// Tried when `git_branch` does not exist in a repository.
    pub git_fallback_branch: Option<String>,
    pub github_owner: Option<String>,
    pub github_hostname: String,
    /// Pull over ssh rather than https.
    pub github_pull_ssh: bool,
    /// Owner of the `upstream` remote when origin is a fork.
    pub github_upstream_owner: Option<String>,
    /// Directory of local mirrors used instead of `github_owner`.
    pub github_filesystem_root: Option<PathBuf>,
    pub build_number: String,
}

impl Default for BranchOptions {
    fn default() -> Self {
        Self {
            git_branch: None,
            git_fallback_branch: None,
            github_owner: None,
            github_hostname: defaults::DEFAULT_GITHUB_HOSTNAME.to_string(),
            github_pull_ssh: false,
            github_upstream_owner: None,
            github_filesystem_root: None,
            build_number: defaults::default_build_number().to_string(),
        }
    }
}

/// Tracks a named branch across repositories.
pub struct BranchSourceCodeManager {
    root_dir: PathBuf,
    git: GitRunner,
    options: BranchOptions,
    repository_names: Vec<String>,
    locks: LocalDirLocks,
}

impl BranchSourceCodeManager {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        git: GitRunner,
        options: BranchOptions,
        repository_names: Vec<String>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            git,
            options,
            repository_names,
            locks: LocalDirLocks::new(),
        }
    }

    pub fn options(&self) -> &BranchOptions {
        &self.options
    }

    fn require_branch(&self) -> Result<&str> {
        self.options.git_branch.as_deref().ok_or_else(|| {
            Error::config_with_hint(
                "No branch to track",
                "Pass --git_branch, or use --bom_path/--bom_version instead",
            )
        })
    }

    /// The url `name` is cloned from.
    pub fn origin_for(&self, name: &str) -> Result<String> {
        if let Some(root) = &self.options.github_filesystem_root {
            return Ok(root.join(name).display().to_string());
        }
        let owner = self.options.github_owner.as_deref().ok_or_else(|| {
            Error::config_with_hint(
                "No repository owner configured",
                "Pass --github_owner or --github_filesystem_root",
            )
        })?;
        let host = &self.options.github_hostname;
        Ok(if self.options.github_pull_ssh {
            make_ssh_url(host, owner, name)
        } else {
            make_https_url(host, owner, name)
        })
    }

    fn upstream_for(&self, name: &str) -> Option<String> {
        if self.options.github_filesystem_root.is_some() {
            return None;
        }
        self.options
            .github_upstream_owner
            .as_deref()
            .map(|owner| make_https_url(&self.options.github_hostname, owner, name))
    }

    fn expected_branch<'a>(&'a self, spec: &'a RepositorySpec) -> Result<&'a str> {
        match spec.branch.as_deref() {
            Some(branch) => Ok(branch),
            None => self.require_branch(),
        }
    }
}

impl SourceCodeManager for BranchSourceCodeManager {
    fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn git(&self) -> &GitRunner {
        &self.git
    }

    fn determine_source_repositories(&self) -> Result<Vec<RepositorySpec>> {
        let branch = self.require_branch()?;
        self.repository_names
            .iter()
            .map(|name| {
                let mut spec = RepositorySpec::new(name.as_str(), self.local_dir_for(name))
                    .with_origin(self.origin_for(name)?)
                    .with_branch(branch);
                if let Some(upstream) = self.upstream_for(name) {
                    spec = spec.with_upstream(upstream);
                }
                Ok(spec)
            })
            .collect()
    }

    fn ensure_local_repository(&self, spec: &RepositorySpec) -> Result<()> {
        let _guard = self.locks.acquire(&spec.git_dir)?;
        if spec.git_dir.exists() {
            debug!("{} already exists, checking its branch", spec.git_dir.display());
            self.check_repository_is_current(spec)?;
            return Ok(());
        }

        let branch = self.expected_branch(spec)?;
        self.git.clone_repository_to_path(
            spec,
            None,
            Some(branch),
            self.options.git_fallback_branch.as_deref(),
        )
    }

    fn determine_build_number(&self, _spec: &RepositorySpec) -> Result<String> {
        Ok(self.options.build_number.clone())
    }

    fn check_repository_is_current(&self, spec: &RepositorySpec) -> Result<bool> {
        let expected = self.expected_branch(spec)?;
        let have = self.git.query_local_repository_branch(&spec.git_dir)?;
        if have == expected || self.options.git_fallback_branch.as_deref() == Some(have.as_str()) {
            return Ok(true);
        }

        warn!(
            "Repository {} is in branch \"{}\" instead of \"{}\", checking out \"{}\"",
            spec.git_dir.display(),
            have,
            expected,
            expected
        );
        self.git.checkout(&spec.git_dir, expected)?;
        Ok(false)
    }
}
