//! Construction of source code managers and processors for one invocation.
//!
//! `RepositoryCommandOptions` is the immutable configuration of a command
//! invocation. `RepositoryCommandFactory` describes a command (its name,
//! default repositories, fan-out cap and failure policy) and turns options
//! into a ready-to-run `RepositoryCommandProcessor`.
//!
//! All configuration problems surface here, before any repository is touched.

use std::path::PathBuf;

use log::debug;

use crate::bom::Bom;
use crate::defaults;
use crate::error::{Error, Result};
use crate::git::{GitOptions, GitRunner};
use crate::processor::{FailurePolicy, ProcessorOptions, RepositoryCommand, RepositoryCommandProcessor};
use crate::scm::{BomSourceCodeManager, BranchOptions, BranchSourceCodeManager, SourceCodeManager};

/// Options shared by every repository command.
#[derive(Debug, Clone)]
pub struct RepositoryCommandOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,

    pub git_branch: Option<String>,
    pub git_fallback_branch: Option<String>,
    pub bom_path: Option<PathBuf>,
    pub bom_version: Option<String>,
    pub bom_tool: String,

    pub only_repositories: Vec<String>,
    pub one_at_a_time: bool,
    /// Overrides the command's own fan-out cap.
    pub max_parallelism: Option<usize>,

    pub github_owner: Option<String>,
    pub github_hostname: String,
    pub github_pull_ssh: bool,
    pub github_upstream_owner: Option<String>,
    pub github_filesystem_root: Option<PathBuf>,

    pub build_number: String,
    pub git: GitOptions,
}

impl Default for RepositoryCommandOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from(defaults::DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(defaults::DEFAULT_OUTPUT_DIR),
            git_branch: None,
            git_fallback_branch: None,
            bom_path: None,
            bom_version: None,
            bom_tool: defaults::DEFAULT_BOM_TOOL.to_string(),
            only_repositories: Vec::new(),
            one_at_a_time: false,
            max_parallelism: None,
            github_owner: None,
            github_hostname: defaults::DEFAULT_GITHUB_HOSTNAME.to_string(),
            github_pull_ssh: false,
            github_upstream_owner: None,
            github_filesystem_root: None,
            build_number: defaults::default_build_number().to_string(),
            git: GitOptions::default(),
        }
    }
}

/// Where the repositories of an invocation come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelection {
    Branch(String),
    BomPath(PathBuf),
    BomVersion(String),
}

impl RepositoryCommandOptions {
    /// Exactly one of `--git_branch`, `--bom_path` and `--bom_version`.
    pub fn source_selection(&self) -> Result<SourceSelection> {
        let hint = "Pass exactly one of --git_branch, --bom_path or --bom_version";
        let mut chosen = Vec::new();
        if let Some(branch) = &self.git_branch {
            chosen.push(SourceSelection::Branch(branch.clone()));
        }
        if let Some(path) = &self.bom_path {
            chosen.push(SourceSelection::BomPath(path.clone()));
        }
        if let Some(version) = &self.bom_version {
            chosen.push(SourceSelection::BomVersion(version.clone()));
        }

        match chosen.len() {
            0 => Err(Error::config_with_hint("No source repositories specified", hint)),
            1 => Ok(chosen.remove(0)),
            _ => Err(Error::config_with_hint(
                "--git_branch, --bom_path and --bom_version are mutually exclusive",
                hint,
            )),
        }
    }

    fn branch_options(&self) -> BranchOptions {
        BranchOptions {
            git_branch: self.git_branch.clone(),
            git_fallback_branch: self.git_fallback_branch.clone(),
            github_owner: self.github_owner.clone(),
            github_hostname: self.github_hostname.clone(),
            github_pull_ssh: self.github_pull_ssh,
            github_upstream_owner: self.github_upstream_owner.clone(),
            github_filesystem_root: self.github_filesystem_root.clone(),
            build_number: self.build_number.clone(),
        }
    }
}

/// Describes one repository command.
#[derive(Debug, Clone)]
pub struct RepositoryCommandFactory {
    pub name: String,
    pub description: String,
    /// Repositories tracked in branch mode. A BOM source brings its own set,
    /// every service it pins to a commit.
    pub repository_names: Vec<String>,
    pub max_parallelism: usize,
    pub failure_policy: FailurePolicy,
    /// Reject BOM sources.
    pub branch_only: bool,
}

impl RepositoryCommandFactory {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            repository_names: defaults::default_repository_names(),
            max_parallelism: defaults::DEFAULT_MAX_PARALLELISM,
            failure_policy: FailurePolicy::default(),
            branch_only: false,
        }
    }

    pub fn with_repository_names(mut self, names: Vec<String>) -> Self {
        self.repository_names = names;
        self
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn branch_only(mut self) -> Self {
        self.branch_only = true;
        self
    }

    /// `<input_dir>/<command>`, the parent of this command's clones.
    pub fn source_dir(&self, options: &RepositoryCommandOptions) -> PathBuf {
        options.input_dir.join(&self.name)
    }

    /// `<output_dir>/<command>`.
    pub fn output_dir(&self, options: &RepositoryCommandOptions) -> PathBuf {
        options.output_dir.join(&self.name)
    }

    pub fn make_source_code_manager(
        &self,
        options: &RepositoryCommandOptions,
    ) -> Result<Box<dyn SourceCodeManager>> {
        let selection = options.source_selection()?;
        let root = self.source_dir(options);
        let git = GitRunner::new(options.git.clone());
        debug!("{} sources: {:?} under {}", self.name, selection, root.display());

        let bom = match selection {
            SourceSelection::Branch(_) => {
                return Ok(Box::new(BranchSourceCodeManager::new(
                    root,
                    git,
                    options.branch_options(),
                    self.repository_names.clone(),
                )));
            }
            _ if self.branch_only => {
                return Err(Error::config_with_hint(
                    format!("{} only works from a branch", self.name),
                    "Pass --git_branch instead of --bom_path or --bom_version",
                ));
            }
            SourceSelection::BomPath(path) => Bom::load_from_path(&path)?,
            SourceSelection::BomVersion(version) => Bom::retrieve_version(&version, &options.bom_tool)?,
        };
        Ok(Box::new(BomSourceCodeManager::new(root, git, bom, Vec::new())))
    }

    pub fn processor_options(&self, options: &RepositoryCommandOptions) -> ProcessorOptions {
        ProcessorOptions {
            max_parallelism: options.max_parallelism.unwrap_or(self.max_parallelism).max(1),
            one_at_a_time: options.one_at_a_time,
            only_repositories: options.only_repositories.clone(),
            failure_policy: self.failure_policy,
        }
    }

    pub fn make_processor<C: RepositoryCommand>(
        &self,
        command: C,
        options: &RepositoryCommandOptions,
    ) -> Result<RepositoryCommandProcessor<C>> {
        let scm = self.make_source_code_manager(options)?;
        Ok(RepositoryCommandProcessor::new(
            command,
            scm,
            self.processor_options(options),
        ))
    }
}
