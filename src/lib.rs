//! # Buildtool Library
//!
//! This library provides the core of a multi-repository build and release
//! orchestrator. It is designed to be used by the `buildtool` command-line
//! tool but the pieces can also be driven directly, for example from tests or
//! from a release pipeline written in Rust.
//!
//! ## Quick Example
//!
//! ```
//! use buildtool::version::{CommitMessage, SemanticVersion, VersionBump};
//!
//! let previous = SemanticVersion::parse_tag("version-1.2.3").unwrap();
//! let commits = vec![
//!     CommitMessage::new("c3", "fix(api): handle empty body"),
//!     CommitMessage::new("c2", "feat(api): add pagination"),
//! ];
//!
//! let bump = VersionBump::determine(&previous, &commits).unwrap();
//! assert_eq!(bump.tag(), "version-1.3.0");
//! assert_eq!(bump.commit_id, "c3");
//! ```
//!
//! ## Core Concepts
//!
//! - **Git plumbing (`git`, `subprocess`)**: `GitRunner` clones, checks out,
//!   tags and pushes by shelling out to `git`, retrying transient failures.
//! - **Versioning (`version`)**: conventional-commit parsing and the semantic
//!   version bump a range of commits implies.
//! - **Repositories (`repository`, `bom`)**: what a repository is, what state
//!   its clone is in, and the bill of materials that pins a whole release.
//! - **Source code managers (`scm`)**: resolve which repositories to work on
//!   and keep their local clones synchronized, either tracking a branch or
//!   pinned to a BOM.
//! - **Processing (`processor`, `factory`, `metrics`)**: run one command over
//!   every repository with bounded concurrency, isolating failures and
//!   reporting outcomes.
//!
//! ## Execution Flow
//!
//! 1.  **Configuration**: `RepositoryCommandOptions` are validated and a
//!     `SourceCodeManager` is built by `RepositoryCommandFactory`.
//! 2.  **Preprocess**: the command prepares once and the repository set is
//!     resolved and filtered.
//! 3.  **Fan-out**: each repository is synchronized and processed on a bounded
//!     worker pool.
//! 4.  **Postprocess**: the command sees every outcome at once, for example to
//!     assemble a BOM.
//! 5.  **Report**: failures and the outcome summary are rendered by `output`.

pub mod bom;
pub mod defaults;
pub mod error;
pub mod factory;
pub mod git;
pub mod metrics;
pub mod output;
pub mod processor;
pub mod repository;
pub mod scm;
pub mod subprocess;
pub mod version;

#[cfg(test)]
mod version_proptest;
