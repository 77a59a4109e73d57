//! Run command implementation
//!
//! Runs a shell command inside every repository. Each repository's output is
//! written to `<output_dir>/run/<repo>.log`. These are build-tool sized jobs,
//! so fan-out is capped lower than for git-only commands.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use log::{debug, info};

use buildtool::defaults;
use buildtool::error::{Error, Result as BuildResult};
use buildtool::factory::RepositoryCommandFactory;
use buildtool::output::OutputConfig;
use buildtool::processor::{FailurePolicy, RepositoryCommand};
use buildtool::repository::RepositorySpec;
use buildtool::scm::SourceCodeManager;
use buildtool::subprocess::run_shell;

use super::{check_outcome, run_repository_command, SourceArgs};

pub const NAME: &str = "run";

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Shell command line to run in each repository
    #[arg(long, value_name = "SHELL")]
    pub command: String,

    /// Fail as a whole if any repository fails
    #[arg(long = "require_all")]
    pub require_all: bool,
}

pub struct RunCommand {
    command_line: String,
    log_dir: PathBuf,
}

impl RepositoryCommand for RunCommand {
    type Output = PathBuf;

    fn name(&self) -> &str {
        NAME
    }

    fn prepare(&mut self, _scm: &dyn SourceCodeManager) -> BuildResult<()> {
        fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }

    fn process_repository(
        &self,
        _scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> BuildResult<PathBuf> {
        debug!("Running `{}` in {}", self.command_line, spec.git_dir.display());
        let output = run_shell(&self.command_line, &spec.git_dir)?;
        let log_path = self.log_dir.join(format!("{}.log", spec.name));
        fs::write(&log_path, output.combined())?;

        if !output.success() {
            let status = output
                .code
                .map(|code| format!("exit code {}", code))
                .unwrap_or_else(|| "a signal".to_string());
            return Err(Error::execution(
                "sh",
                format!("`{}` ended with {}, see {}", self.command_line, status, log_path.display()),
                output.combined(),
            ));
        }
        info!("{}: `{}` succeeded", spec.name, self.command_line);
        Ok(log_path)
    }
}

/// Execute the run command
pub fn execute(args: RunArgs, output: &OutputConfig) -> Result<()> {
    let mut factory = RepositoryCommandFactory::new(NAME, "Run a command in every repository.")
        .with_max_parallelism(defaults::HEAVYWEIGHT_MAX_PARALLELISM);
    if args.require_all {
        factory = factory.with_failure_policy(FailurePolicy::RequireFullSuccess);
    }
    let options = args.source.to_options();
    let command = RunCommand {
        command_line: args.command,
        log_dir: factory.output_dir(&options),
    };

    let (result, _) = run_repository_command(&factory, command, &options, output)?;
    check_outcome(&result)
}
