//! # Output Configuration
//!
//! This module controls CLI output appearance (color and emoji support based
//! on terminal capabilities and user preferences) and renders the report
//! printed at the end of every repository command.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use buildtool::output::{OutputConfig, render_command_report};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//! let result = processor.run()?;
//! print!("{}", render_command_report(&config, &result));
//! ```

use std::env;
use std::fmt::Write;

use console::style;

use crate::processor::{CommandResult, RepositoryOutcome};

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Arguments
    /// * `color_flag` - The value of the --color CLI flag: "always", "never", or "auto"
    ///
    /// # Behavior
    /// - `--color=always`: Force colors on (overrides NO_COLOR)
    /// - `--color=never`: Force colors off
    /// - `--color=auto`: Detect based on environment
    ///
    /// In auto mode, colors are disabled if:
    /// - `NO_COLOR` environment variable is set (any value, including empty)
    /// - `CLICOLOR=0` is set
    /// - `TERM=dumb` is set
    /// - stdout is not a TTY (unless `CLICOLOR_FORCE=1`)
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    /// Detect whether color output is supported based on environment.
    fn detect_color_support() -> bool {
        // Check NO_COLOR first (https://no-color.org/)
        // The presence of the variable (even if empty) disables colors
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        // Check CLICOLOR=0 disables colors
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        // Check CLICOLOR_FORCE=1 forces colors
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        // Check TERM=dumb
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        // Use console crate's detection for TTY and color support
        console::Term::stdout().features().colors_supported()
    }

    /// Create a configuration with colors always enabled.
    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Create a configuration with colors always disabled.
    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the appropriate string based on color configuration.
///
/// When colors are enabled, returns the emoji. When disabled, returns
/// the plain text alternative.
///
/// # Arguments
/// * `config` - The output configuration
/// * `emoji` - The emoji to use when colors are enabled
/// * `plain` - The plain text to use when colors are disabled
///
/// # Example
/// ```rust,ignore
/// let config = OutputConfig::from_env_and_flag("auto");
/// println!("{} Validating...", emoji(&config, "üîç", "[SCAN]"));
/// ```
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Render the end-of-command report.
///
/// Each failed repository gets its error classification, the stage it failed
/// in, the error itself and any captured tool output. The last line is the
/// `N succeeded, M failed, K skipped` summary.
pub fn render_command_report<T>(config: &OutputConfig, result: &CommandResult<T>) -> String {
    let mut out = String::new();

    for (name, outcome) in &result.results {
        let RepositoryOutcome::Skipped(reason) = outcome else {
            continue;
        };
        let _ = writeln!(out, "{} {}: skipped ({})", emoji(config, "⏭️ ", "[SKIP]"), name, reason);
    }

    for (name, failure) in result.failures() {
        let label = format!("{} {}", emoji(config, "❌", "[FAIL]"), name);
        let label = if config.use_color {
            style(label).red().bold().to_string()
        } else {
            label
        };
        let _ = writeln!(
            out,
            "{}: {} during {}",
            label,
            failure.error.classification(),
            failure.stage
        );
        let _ = writeln!(out, "    {}", failure.error);
        if let Some(output) = failure.error.captured_output() {
            for line in output.lines().filter(|line| !line.trim().is_empty()) {
                let _ = writeln!(out, "    | {}", line);
            }
        }
    }

    let marker = if result.summary.has_failures() {
        emoji(config, "⚠️ ", "[DONE]")
    } else {
        emoji(config, "✅", "[DONE]")
    };
    let _ = writeln!(out, "{} {}: {}", marker, result.command, result.summary);
    out
}
