//! # Error Handling
//!
//! This module defines the centralized error type for `buildtool`. It uses
//! `thiserror` to build one `Error` enum whose variants follow the three
//! failure classes every command reports:
//!
//! - **Configuration errors** (`Error::Config`): missing or contradictory user
//!   input. These are detected before any repository work starts and are never
//!   retried.
//! - **Execution errors** (`Error::Execution`): a subprocess (git, a build tool,
//!   the release-manifest tool) failed after its retries were exhausted. The
//!   variant carries the program name and the captured output so the final
//!   report can show what the tool said.
//! - **Unexpected errors** (`Error::Unexpected`): an internal invariant was
//!   violated, such as a repository missing from a BOM that should contain it.
//!
//! `Error::RepositoryFailures` is the aggregate raised by the command processor
//! when a command requires every repository to succeed.
//!
//! Library errors (I/O, YAML, regex, ...) are wrapped through `#[from]` so `?`
//! works across the crate.

use thiserror::Error;

/// Main error type for buildtool operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or contradictory configuration.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration
        hint: Option<String>,
    },

    /// A subprocess failed after its retries were exhausted.
    #[error("{program} failed: {message}")]
    Execution {
        program: String,
        message: String,
        /// Captured stdout/stderr of the failing invocation
        output: String,
    },

    /// An internal invariant was violated.
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },

    /// One or more repositories failed in a command that requires full success.
    #[error("{command} failed for {} of {attempted} repositories:\n{}", failures.len(), format_failures(failures))]
    RepositoryFailures {
        command: String,
        attempted: usize,
        /// (repository name, rendered error) pairs, sorted by repository name
        failures: Vec<(String, String)>,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML error, wrapped from `serde_yaml::Error`.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON serialization error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A version number parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),

    /// A mutex guarding shared state was poisoned by a panicking worker.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, error)| format!("  {}: {}", name, error))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Shorthand for a configuration error without a hint.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a configuration error with a hint.
    pub fn config_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn execution(
        program: impl Into<String>,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Error::Execution {
            program: program.into(),
            message: message.into(),
            output: output.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Error::Unexpected {
            message: message.into(),
        }
    }

    /// The failure class shown in reports.
    pub fn classification(&self) -> &'static str {
        match self {
            Error::Config { .. } => "ConfigError",
            Error::Execution { .. } | Error::Io(_) => "ExecutionError",
            Error::RepositoryFailures { .. } => "ExecutionError",
            _ => "UnexpectedError",
        }
    }

    /// Only subprocess failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }

    /// Captured subprocess output, if this error came from a subprocess.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Error::Execution { output, .. } if !output.trim().is_empty() => Some(output),
            _ => None,
        }
    }

    /// True when an upstream service refused us for abuse or rate limiting.
    ///
    /// Issuing more work after this only digs the hole deeper, so the command
    /// processor stops starting new repositories when it sees one.
    pub fn is_abuse_protection(&self) -> bool {
        match self {
            Error::Execution {
                message, output, ..
            } => {
                let text = format!("{}\n{}", message, output).to_lowercase();
                text.contains("abuse detection") || text.contains("rate limit exceeded")
            }
            _ => false,
        }
    }
}
