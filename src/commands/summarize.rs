//! Summarize command implementation
//!
//! Writes `<output_dir>/summarize/<repo>.yml` with each repository's summary
//! and prints one `repo: tag (commit)` line per repository.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use buildtool::error::Result as BuildResult;
use buildtool::factory::RepositoryCommandFactory;
use buildtool::output::OutputConfig;
use buildtool::processor::RepositoryCommand;
use buildtool::repository::{RepositorySpec, RepositorySummary};
use buildtool::scm::SourceCodeManager;

use super::{check_outcome, run_repository_command, SourceArgs};

pub const NAME: &str = "summarize";

/// Arguments for the summarize command
#[derive(Args, Debug)]
pub struct SummarizeArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Leave commit messages out of the written summaries
    #[arg(long = "omit_commit_messages")]
    pub omit_commit_messages: bool,

    /// Print one JSON object per repository instead of summary lines
    #[arg(long)]
    pub json: bool,
}

pub struct SummarizeCommand {
    output_dir: PathBuf,
    with_commit_messages: bool,
}

impl RepositoryCommand for SummarizeCommand {
    type Output = RepositorySummary;

    fn name(&self) -> &str {
        NAME
    }

    fn prepare(&mut self, _scm: &dyn SourceCodeManager) -> BuildResult<()> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    fn process_repository(
        &self,
        scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> BuildResult<RepositorySummary> {
        let summary = scm.git().collect_repository_summary(&spec.git_dir)?;
        let path = self.output_dir.join(format!("{}.yml", spec.name));
        fs::write(&path, summary.to_yaml(self.with_commit_messages)?)?;
        Ok(summary)
    }
}

/// One line per repository, e.g. `gate: version-1.2.3 (abc123)`.
pub fn summary_line(name: &str, summary: &RepositorySummary) -> String {
    format!("{}: {} ({})", name, summary.tag, summary.commit_id)
}

/// Execute the summarize command
pub fn execute(args: SummarizeArgs, output: &OutputConfig) -> Result<()> {
    let factory = RepositoryCommandFactory::new(NAME, "Summarize the state of every repository.");
    let options = args.source.to_options();
    let command = SummarizeCommand {
        output_dir: factory.output_dir(&options),
        with_commit_messages: !args.omit_commit_messages,
    };

    let (result, _) = run_repository_command(&factory, command, &options, output)?;
    for (name, summary) in result.completed() {
        if args.json {
            println!("{}", summary.to_json()?);
        } else {
            println!("{}", summary_line(name, summary));
        }
    }
    check_outcome(&result)
}
