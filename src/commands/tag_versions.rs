//! Tag versions command implementation
//!
//! Tags HEAD of every repository that has commits since its last release
//! with the version those commits imply, and optionally pushes the tag.

use anyhow::Result;
use clap::Args;
use log::{debug, info};

use buildtool::error::Result as BuildResult;
use buildtool::factory::RepositoryCommandFactory;
use buildtool::output::OutputConfig;
use buildtool::processor::RepositoryCommand;
use buildtool::repository::RepositorySpec;
use buildtool::scm::SourceCodeManager;

use super::{check_outcome, run_repository_command, SourceArgs};

pub const NAME: &str = "tag_versions";

/// Arguments for the tag-versions command
#[derive(Args, Debug)]
pub struct TagVersionsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Push new tags to origin
    #[arg(long)]
    pub push: bool,
}

pub struct TagVersionsCommand {
    push: bool,
}

impl RepositoryCommand for TagVersionsCommand {
    /// The new tag, or `None` when HEAD is already released.
    type Output = Option<String>;

    fn name(&self) -> &str {
        NAME
    }

    fn process_repository(
        &self,
        scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> BuildResult<Option<String>> {
        let git = scm.git();
        let summary = git.collect_repository_summary(&spec.git_dir)?;
        if !summary.has_new_commits() {
            debug!("{} is already tagged {}", spec.name, summary.tag);
            return Ok(None);
        }

        git.tag_head(&spec.git_dir, &summary.tag)?;
        info!("Tagged {} at {} as {}", spec.name, summary.commit_id, summary.tag);
        if self.push {
            git.push_tag_to_origin(&spec.git_dir, &summary.tag)?;
        }
        Ok(Some(summary.tag))
    }
}

/// Execute the tag-versions command
pub fn execute(args: TagVersionsArgs, output: &OutputConfig) -> Result<()> {
    let factory = RepositoryCommandFactory::new(NAME, "Tag new versions in every repository.");
    let options = args.source.to_options();
    let command = TagVersionsCommand { push: args.push };

    let (result, _) = run_repository_command(&factory, command, &options, output)?;
    for (name, tag) in result.completed() {
        match tag {
            Some(tag) => println!("{}: {}", name, tag),
            None => println!("{}: unchanged", name),
        }
    }
    check_outcome(&result)
}
