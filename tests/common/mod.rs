//! Shared test utilities for integration and E2E tests.
//!
//! Tests work against real git repositories created with the system `git`
//! binary inside a temporary directory. A [`MirrorFixture`] holds a set of
//! "mirror" repositories that play the part of the remote server (they are
//! passed to `--github_filesystem_root`) plus a work directory for clones.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = MirrorFixture::new();
//!     let gate = fixture.create_repository("gate");
//!     gate.commit("fix(api): first");
//!     gate.tag("version-1.0.0");
//! }
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{git, MirrorFixture, SourceRepository};
}

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .env("GIT_AUTHOR_NAME", "Test Author")
        .env("GIT_AUTHOR_EMAIL", "author@example.com")
        .env("GIT_COMMITTER_NAME", "Test Author")
        .env("GIT_COMMITTER_EMAIL", "author@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository under the fixture's mirror directory.
pub struct SourceRepository {
    pub name: String,
    pub path: PathBuf,
}

#[allow(dead_code)]
impl SourceRepository {
    /// Commit a change with `message`, returning the new commit id.
    pub fn commit(&self, message: &str) -> String {
        let mut changes = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.join("CHANGES.txt"))
            .expect("Failed to open CHANGES.txt");
        writeln!(changes, "{}", message.lines().next().unwrap_or_default())
            .expect("Failed to write CHANGES.txt");

        git(&self.path, &["add", "CHANGES.txt"]);
        git(&self.path, &["commit", "-q", "-m", message]);
        self.head()
    }

    pub fn tag(&self, tag: &str) {
        git(&self.path, &["tag", tag]);
    }

    pub fn annotated_tag(&self, tag: &str) {
        git(&self.path, &["tag", "-a", tag, "-m", tag]);
    }

    pub fn create_branch(&self, branch: &str) {
        git(&self.path, &["checkout", "-q", "-b", branch]);
    }

    pub fn checkout(&self, reference: &str) {
        git(&self.path, &["checkout", "-q", reference]);
    }

    pub fn head(&self) -> String {
        git(&self.path, &["rev-parse", "HEAD"])
    }
}

/// Mirrors plus a work directory in one temporary directory.
pub struct MirrorFixture {
    temp_dir: tempfile::TempDir,
}

#[allow(dead_code)]
impl MirrorFixture {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("mirrors")).expect("Failed to create mirrors");
        fs::create_dir_all(temp_dir.path().join("work")).expect("Failed to create work dir");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Pass this as `--github_filesystem_root`.
    pub fn mirrors_dir(&self) -> PathBuf {
        self.path().join("mirrors")
    }

    /// Parent for `--input_dir` and `--output_dir`.
    pub fn work_dir(&self) -> PathBuf {
        self.path().join("work")
    }

    /// `git init` a repository with a `master` branch.
    pub fn create_repository(&self, name: &str) -> SourceRepository {
        let path = self.mirrors_dir().join(name);
        fs::create_dir_all(&path).expect("Failed to create repository dir");
        git(&path, &["init", "-q"]);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        SourceRepository {
            name: name.to_string(),
            path,
        }
    }

    /// A repository with one released commit tagged `version-<version>`.
    pub fn create_released_repository(&self, name: &str, version: &str) -> SourceRepository {
        let repo = self.create_repository(name);
        repo.commit("chore(build): initial commit");
        repo.tag(&format!("version-{}", version));
        repo
    }
}

impl Default for MirrorFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_dirs() {
        let fixture = MirrorFixture::new();
        assert!(fixture.mirrors_dir().exists());
        assert!(fixture.work_dir().exists());
    }

    #[test]
    fn test_released_repository_has_tag() {
        let fixture = MirrorFixture::new();
        let repo = fixture.create_released_repository("gate", "1.0.0");
        assert_eq!(git(&repo.path, &["tag"]), "version-1.0.0");
        assert_eq!(git(&repo.path, &["rev-parse", "--abbrev-ref", "HEAD"]), "master");
    }
}
