//! Build BOM command implementation
//!
//! Assembles a bill of materials from branch-tracked repositories. Every
//! repository has to be summarized successfully, a partial BOM is never
//! written.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use log::info;

use buildtool::bom::{Bom, BomBuilder};
use buildtool::error::Result as BuildResult;
use buildtool::factory::RepositoryCommandFactory;
use buildtool::output::OutputConfig;
use buildtool::processor::{FailurePolicy, RepositoryCommand, RepositoryOutcome, RepositoryResults};
use buildtool::repository::{RepositorySpec, SourceInfo};
use buildtool::scm::SourceCodeManager;

use super::{run_repository_command, SourceArgs};

pub const NAME: &str = "build_bom";

/// Arguments for the build-bom command
#[derive(Args, Debug)]
pub struct BuildBomArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Where to write the BOM (defaults to <output_dir>/build_bom/<branch>-<build>.yml)
    #[arg(long = "bom_output", value_name = "PATH")]
    pub bom_output: Option<PathBuf>,

    /// Refresh this BOM instead of starting from scratch
    #[arg(long = "refresh_from_bom_path", value_name = "PATH")]
    pub refresh_from_bom_path: Option<PathBuf>,
}

pub struct BuildBomCommand {
    builder: BomBuilder,
    version: String,
    output_path: PathBuf,
    bom: Option<Bom>,
}

impl BuildBomCommand {
    pub fn new(base: Option<Bom>, version: impl Into<String>, output_path: PathBuf) -> Self {
        Self {
            builder: BomBuilder::new(base),
            version: version.into(),
            output_path,
            bom: None,
        }
    }

    pub fn bom(&self) -> Option<&Bom> {
        self.bom.as_ref()
    }
}

impl RepositoryCommand for BuildBomCommand {
    type Output = (RepositorySpec, SourceInfo);

    fn name(&self) -> &str {
        NAME
    }

    fn process_repository(
        &self,
        scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> BuildResult<(RepositorySpec, SourceInfo)> {
        Ok((spec.clone(), scm.lookup_source_info(spec)?))
    }

    fn postprocess(
        &mut self,
        _scm: &dyn SourceCodeManager,
        results: RepositoryResults<Self::Output>,
    ) -> BuildResult<RepositoryResults<Self::Output>> {
        for outcome in results.values() {
            if let RepositoryOutcome::Completed((spec, info)) = outcome {
                self.builder.add_repository(spec, info)?;
            }
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let bom = self.builder.build(&self.version, &timestamp);
        if let Some(parent) = self.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.output_path, bom.to_yaml()?)?;
        info!("Wrote BOM {} to {}", bom.version, self.output_path.display());

        self.bom = Some(bom);
        Ok(results)
    }
}

/// Execute the build-bom command
pub fn execute(args: BuildBomArgs, output: &OutputConfig) -> Result<()> {
    let factory = RepositoryCommandFactory::new(NAME, "Build a BOM from branch sources.")
        .branch_only()
        .with_failure_policy(FailurePolicy::RequireFullSuccess);
    let options = args.source.to_options();
    // make_processor rejects every source but a branch
    let branch = options.git_branch.clone().unwrap_or_default();
    let version = format!("{}-{}", branch, options.build_number);
    let output_path = args
        .bom_output
        .unwrap_or_else(|| factory.output_dir(&options).join(format!("{}.yml", version)));
    let base = args
        .refresh_from_bom_path
        .as_deref()
        .map(Bom::load_from_path)
        .transpose()?;

    let (_, command) = run_repository_command(
        &factory,
        BuildBomCommand::new(base, version, output_path),
        &options,
        output,
    )?;
    if let Some(bom) = command.bom() {
        println!("{}", bom.version);
    }
    Ok(())
}
