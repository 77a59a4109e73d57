//! Default values for buildtool configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::sync::OnceLock;

use chrono::Utc;

/// Directory local clones are created under, one subdirectory per command.
pub const DEFAULT_INPUT_DIR: &str = "source_code";

/// Directory command outputs (summaries, logs, BOMs) are written under.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Fan-out width for commands that only run git.
pub const DEFAULT_MAX_PARALLELISM: usize = 64;

/// Fan-out width for commands that run build tools.
pub const HEAVYWEIGHT_MAX_PARALLELISM: usize = 5;

pub const DEFAULT_GITHUB_HOSTNAME: &str = "github.com";

/// Release-manifest tool used to retrieve published BOMs.
pub const DEFAULT_BOM_TOOL: &str = "hal";

/// Environment variable the build number is taken from.
pub const BUILD_NUMBER_ENV: &str = "BUILD_NUMBER";

/// Repositories processed when a command is not given an explicit set.
pub const DEFAULT_REPOSITORY_NAMES: &[&str] = &[
    "clouddriver",
    "deck",
    "echo",
    "fiat",
    "front50",
    "gate",
    "igor",
    "kayenta",
    "orca",
    "rosco",
];

pub fn default_repository_names() -> Vec<String> {
    DEFAULT_REPOSITORY_NAMES
        .iter()
        .map(|name| name.to_string())
        .collect()
}

/// The build number used when none is supplied.
///
/// `BUILD_NUMBER` if set, otherwise a UTC `%Y%m%d%H%M%S` timestamp. Either
/// way it is computed once, so every repository in a process agrees.
pub fn default_build_number() -> &'static str {
    static BUILD_NUMBER: OnceLock<String> = OnceLock::new();
    BUILD_NUMBER.get_or_init(|| resolve_build_number(std::env::var(BUILD_NUMBER_ENV).ok()))
}

fn resolve_build_number(from_env: Option<String>) -> String {
    match from_env {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => Utc::now().format("%Y%m%d%H%M%S").to_string(),
    }
}
