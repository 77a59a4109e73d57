//! CLI argument parsing and command dispatch

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use buildtool::output::OutputConfig;

use crate::commands;

/// Buildtool - Build, summarize and release a set of repositories together
#[derive(Parser, Debug)]
#[command(name = "buildtool")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone or update the local copy of every repository
    FetchSource(commands::fetch_source::FetchSourceArgs),

    /// Write a summary of each repository and the version it would release
    Summarize(commands::summarize::SummarizeArgs),

    /// Run a shell command in every repository
    Run(commands::run::RunArgs),

    /// Build a BOM from the repositories of a branch
    BuildBom(commands::build_bom::BuildBomArgs),

    /// Tag every repository with its next version
    TagVersions(commands::tag_versions::TagVersionsArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level)?;
        let output = OutputConfig::from_env_and_flag(&self.color);

        match self.command {
            Commands::FetchSource(args) => commands::fetch_source::execute(args, &output),
            Commands::Summarize(args) => commands::summarize::execute(args, &output),
            Commands::Run(args) => commands::run::execute(args, &output),
            Commands::BuildBom(args) => commands::build_bom::execute(args, &output),
            Commands::TagVersions(args) => commands::tag_versions::execute(args, &output),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

/// Install `env_logger` at `log_level`. `RUST_LOG` wins when set.
fn init_logging(log_level: &str) -> Result<()> {
    let level: LevelFilter = log_level
        .parse()
        .map_err(|_| anyhow!("Invalid log level: {}", log_level))?;

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A logger may already be installed when driven from tests.
    let _ = builder.try_init();
    Ok(())
}
