//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the `buildtool`
//! command-line tool. Each subcommand is defined in its own file to keep the
//! logic separated and maintainable.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`. Repository commands flatten in the shared
//!   [`SourceArgs`].
//! - A `RepositoryCommand` implementation holding the per-repository work.
//! - An `execute` function that takes the parsed `Args`, runs the command over
//!   every repository through [`run_repository_command`] and reports the
//!   outcome.

pub mod build_bom;
pub mod completions;
pub mod fetch_source;
pub mod run;
pub mod summarize;
pub mod tag_versions;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use buildtool::defaults;
use buildtool::factory::{RepositoryCommandFactory, RepositoryCommandOptions};
use buildtool::git::GitOptions;
use buildtool::metrics::{CommandSummary, MetricsSink, OutcomeKind};
use buildtool::output::{render_command_report, OutputConfig};
use buildtool::processor::{CommandResult, RepositoryCommand};

/// Flags shared by every command that works on a set of repositories
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Track this branch in every repository
    #[arg(long = "git_branch", value_name = "BRANCH")]
    pub git_branch: Option<String>,

    /// Branch to use in repositories that lack --git_branch
    #[arg(long = "git_fallback_branch", value_name = "BRANCH")]
    pub git_fallback_branch: Option<String>,

    /// Take repositories and commits from this BOM file
    #[arg(long = "bom_path", value_name = "PATH")]
    pub bom_path: Option<PathBuf>,

    /// Take repositories and commits from this published BOM version
    #[arg(long = "bom_version", value_name = "VERSION")]
    pub bom_version: Option<String>,

    /// Tool used to retrieve published BOMs
    #[arg(long = "bom_tool", value_name = "PROGRAM", default_value = defaults::DEFAULT_BOM_TOOL)]
    pub bom_tool: String,

    /// Restrict the command to these repositories (comma separated)
    #[arg(long = "only_repositories", value_name = "NAMES", value_delimiter = ',')]
    pub only_repositories: Vec<String>,

    /// Process repositories sequentially
    #[arg(long = "one_at_a_time")]
    pub one_at_a_time: bool,

    /// Maximum number of repositories processed at once
    #[arg(long = "max_parallelism", value_name = "N")]
    pub max_parallelism: Option<usize>,

    /// Owner of the repositories to clone
    #[arg(long = "github_owner", value_name = "OWNER", env = "GITHUB_OWNER")]
    pub github_owner: Option<String>,

    /// Hostname of the git server
    #[arg(long = "github_hostname", value_name = "HOST", default_value = defaults::DEFAULT_GITHUB_HOSTNAME)]
    pub github_hostname: String,

    /// Clone over ssh instead of https
    #[arg(long = "github_pull_ssh")]
    pub github_pull_ssh: bool,

    /// Push to origin over ssh instead of https
    #[arg(long = "github_push_ssh")]
    pub github_push_ssh: bool,

    /// Owner of the `upstream` remote when origin is a fork
    #[arg(long = "github_upstream_owner", value_name = "OWNER")]
    pub github_upstream_owner: Option<String>,

    /// Clone from local mirrors under this directory instead of a server
    #[arg(long = "github_filesystem_root", value_name = "PATH")]
    pub github_filesystem_root: Option<PathBuf>,

    /// Disable pushing to the upstream remote
    #[arg(long = "github_disable_upstream_push")]
    pub github_disable_upstream_push: bool,

    /// Log pushes instead of performing them
    #[arg(long = "git_never_push")]
    pub git_never_push: bool,

    /// Token handed to git for authentication
    #[arg(long = "github_token", value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Build number for produced artifacts (defaults to a timestamp)
    #[arg(long = "build_number", value_name = "NUMBER", env = "BUILD_NUMBER")]
    pub build_number: Option<String>,

    /// Parent directory of the local clones
    #[arg(long = "input_dir", value_name = "PATH", default_value = defaults::DEFAULT_INPUT_DIR)]
    pub input_dir: PathBuf,

    /// Parent directory of command outputs
    #[arg(long = "output_dir", value_name = "PATH", default_value = defaults::DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
}

impl SourceArgs {
    pub fn to_options(&self) -> RepositoryCommandOptions {
        let build_number = self
            .build_number
            .clone()
            .filter(|number| !number.trim().is_empty())
            .unwrap_or_else(|| defaults::default_build_number().to_string());

        RepositoryCommandOptions {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            git_branch: self.git_branch.clone(),
            git_fallback_branch: self.git_fallback_branch.clone(),
            bom_path: self.bom_path.clone(),
            bom_version: self.bom_version.clone(),
            bom_tool: self.bom_tool.clone(),
            only_repositories: self.only_repositories.clone(),
            one_at_a_time: self.one_at_a_time,
            max_parallelism: self.max_parallelism,
            github_owner: self.github_owner.clone(),
            github_hostname: self.github_hostname.clone(),
            github_pull_ssh: self.github_pull_ssh,
            github_upstream_owner: self.github_upstream_owner.clone(),
            github_filesystem_root: self.github_filesystem_root.clone(),
            build_number,
            git: GitOptions {
                github_push_ssh: self.github_push_ssh,
                github_disable_upstream_push: self.github_disable_upstream_push,
                git_never_push: self.git_never_push,
                auth_token: self.github_token.clone(),
                ..GitOptions::default()
            },
        }
    }
}

/// Drives an `indicatif` progress bar from processor outcomes.
pub struct ProgressMetrics {
    bar: ProgressBar,
}

impl ProgressMetrics {
    pub fn new(output: &OutputConfig) -> Self {
        let bar = if output.use_color {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl MetricsSink for ProgressMetrics {
    fn record_fan_out(&self, command: &str, repositories: usize) {
        self.bar.set_length(repositories as u64);
        self.bar.set_message(command.to_string());
    }

    fn record_repository_outcome(
        &self,
        command: &str,
        repository: &str,
        outcome: OutcomeKind,
        _duration: Duration,
    ) {
        self.bar.set_message(format!("{}: {} {}", command, repository, outcome));
        self.bar.inc(1);
    }

    fn record_command_outcome(&self, _command: &str, _summary: &CommandSummary, _duration: Duration) {
        self.bar.finish_and_clear();
    }
}

/// Run `command` over every repository and print the report.
///
/// Returns the processor result together with the command so callers can
/// read whatever it collected in `postprocess`.
pub fn run_repository_command<C: RepositoryCommand>(
    factory: &RepositoryCommandFactory,
    command: C,
    options: &RepositoryCommandOptions,
    output: &OutputConfig,
) -> Result<(CommandResult<C::Output>, C)> {
    let metrics = Arc::new(ProgressMetrics::new(output));
    let mut processor = factory
        .make_processor(command, options)?
        .with_metrics(metrics.clone());

    let result = processor.run();
    metrics.bar.finish_and_clear();
    let result = result?;

    print!("{}", render_command_report(output, &result));
    Ok((result, processor.into_command()))
}

/// Fail when any repository failed, so the process exits non-zero.
pub fn check_outcome<T>(result: &CommandResult<T>) -> Result<()> {
    if result.summary.has_failures() {
        bail!(
            "{} failed for {} of {} repositories",
            result.command,
            result.summary.failed,
            result.summary.total()
        );
    }
    Ok(())
}
