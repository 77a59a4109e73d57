//! # Repository Value Types
//!
//! This module holds the values that describe one source repository during a
//! command:
//!
//! - **`RepositorySpec`**: the resolved identity of a repository, including
//!   where it lives locally, where it was cloned from and, in BOM mode, the
//!   exact commit it is pinned to. Specs are created once per invocation by a
//!   `SourceCodeManager` and never mutated afterwards.
//!
//! - **`RepositorySummary`**: the observed state of a local clone. A summary is
//!   always produced by querying git (see `GitRunner::collect_repository_summary`)
//!   so that manual changes to a clone are picked up.
//!
//! - **`SourceInfo`**: a summary paired with the build number it will be
//!   released under.

use std::fmt;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::version::CommitMessage;

/// The local directory a repository named `name` is cloned into under `root`.
pub fn local_dir_for(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// A reference to a git repository with local and remote locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    /// Short name used for filtering and BOM lookups.
    pub name: String,
    /// The local path the repository is cloned to.
    pub git_dir: PathBuf,
    /// The url the local clone was cloned from.
    pub origin: Option<String>,
    /// The url the origin is refreshed from, if it is a fork.
    pub upstream: Option<String>,
    /// Pinned commit, always present for BOM-resolved repositories.
    pub commit_id: Option<String>,
    /// Tracked branch for branch-resolved repositories.
    pub branch: Option<String>,
}

impl RepositorySpec {
    pub fn new(name: impl Into<String>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            git_dir: git_dir.into(),
            origin: None,
            upstream: None,
            commit_id: None,
            branch: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// The origin url, which every spec that is going to be cloned must have.
    pub fn require_origin(&self) -> Result<&str> {
        self.origin
            .as_deref()
            .ok_or_else(|| Error::config(format!("{} does not specify an origin", self)))
    }
}

impl fmt::Display for RepositorySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} git_dir={} origin={} upstream={}",
            self.name,
            self.git_dir.display(),
            self.origin.as_deref().unwrap_or("-"),
            self.upstream.as_deref().unwrap_or("-")
        )
    }
}

/// What a local clone looks like, and the version it would be released at.
///
/// If `commit_messages` is empty then `tag` and `version` already exist.
/// Otherwise they are the proposed next release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    /// The HEAD commit id.
    pub commit_id: String,
    pub tag: String,
    /// `major.minor.patch` of `tag`.
    pub version: String,
    /// `major.minor.patch` of the baseline tag.
    pub prev_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit_messages: Vec<CommitMessage>,
}

impl RepositorySummary {
    /// True when HEAD is ahead of the baseline tag.
    pub fn has_new_commits(&self) -> bool {
        !self.commit_messages.is_empty()
    }

    /// Whether the changes amount to only a patch release.
    pub fn patchable(&self) -> Result<bool> {
        let previous = Version::parse(&self.prev_version).map_err(|_| {
            Error::config(format!(
                "Previous version {} is not X.Y.Z",
                self.prev_version
            ))
        })?;
        let current = Version::parse(&self.version)
            .map_err(|_| Error::config(format!("Version {} is not X.Y.Z", self.version)))?;

        if (previous.major, previous.minor) != (current.major, current.minor) {
            return Ok(false);
        }
        if current.patch != previous.patch && current.patch != previous.patch + 1 {
            return Err(Error::unexpected(format!(
                "Unexpected version sequence {} to {}",
                self.prev_version, self.version
            )));
        }
        Ok(current.patch == previous.patch + 1)
    }

    pub fn to_yaml(&self, with_commit_messages: bool) -> Result<String> {
        if with_commit_messages {
            return Ok(serde_yaml::to_string(self)?);
        }
        let stripped = Self {
            commit_messages: Vec::new(),
            ..self.clone()
        };
        Ok(serde_yaml::to_string(&stripped)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A repository summary and the build number its artifacts will carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub build_number: String,
    pub summary: RepositorySummary,
}

impl SourceInfo {
    pub fn new(build_number: impl Into<String>, summary: RepositorySummary) -> Self {
        Self {
            build_number: build_number.into(),
            summary,
        }
    }

    /// The version string recorded in a BOM, e.g. `1.2.3-20180101000000`.
    pub fn to_build_version(&self) -> String {
        format!("{}-{}", self.summary.version, self.build_number)
    }
}
