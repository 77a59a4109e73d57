//! Fetch source command implementation
//!
//! Ensures every selected repository has an up-to-date local clone under
//! `<input_dir>/fetch_source/<repo>`.

use anyhow::Result;
use clap::Args;
use log::info;

use buildtool::error::Result as BuildResult;
use buildtool::factory::RepositoryCommandFactory;
use buildtool::output::OutputConfig;
use buildtool::processor::RepositoryCommand;
use buildtool::repository::RepositorySpec;
use buildtool::scm::SourceCodeManager;

use super::{check_outcome, run_repository_command, SourceArgs};

pub const NAME: &str = "fetch_source";

/// Arguments for the fetch-source command
#[derive(Args, Debug)]
pub struct FetchSourceArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Synchronization is all there is to it, the processor does that before
/// `process_repository`.
pub struct FetchSourceCommand;

impl RepositoryCommand for FetchSourceCommand {
    type Output = String;

    fn name(&self) -> &str {
        NAME
    }

    fn process_repository(
        &self,
        scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> BuildResult<String> {
        let commit = scm.git().query_local_repository_commit_id(&spec.git_dir)?;
        info!("{} is at {}", spec.name, commit);
        Ok(commit)
    }
}

/// Execute the fetch-source command
pub fn execute(args: FetchSourceArgs, output: &OutputConfig) -> Result<()> {
    let factory = RepositoryCommandFactory::new(NAME, "Fetch the source code of every repository.");
    let options = args.source.to_options();
    let (result, _) = run_repository_command(&factory, FetchSourceCommand, &options, output)?;
    check_outcome(&result)
}
