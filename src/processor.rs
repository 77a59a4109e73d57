//! # Repository Command Processor
//!
//! The processor runs one `RepositoryCommand` across every selected
//! repository. A run moves through these states:
//!
//! ```text
//! Created -> Preprocess -> FanOut -> Postprocess -> Done
//!                 |           |            |
//!                 +-----------+------------+--> Failed
//! ```
//!
//! - **Preprocess** calls `RepositoryCommand::prepare` once. An error here
//!   aborts before any repository is touched. So does an error resolving the
//!   repository list.
//! - **FanOut** runs each repository through resolve, sync and execute on a
//!   bounded rayon pool (or sequentially when `one_at_a_time` is set). A
//!   failing repository is logged, recorded against its name and does not
//!   affect the others. If an upstream reports abuse or rate-limit detection,
//!   repositories that have not started yet are skipped.
//! - **Postprocess** hands the full result map to
//!   `RepositoryCommand::postprocess`.
//!
//! Under `FailurePolicy::RequireFullSuccess` any failed repository turns the
//! run into `Error::RepositoryFailures` once every repository was attempted.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, error, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::metrics::{CommandSummary, MetricsSink, NoopMetrics, OutcomeKind};
use crate::repository::RepositorySpec;
use crate::scm::SourceCodeManager;

/// A per-repository action plus optional hooks around the fan-out.
pub trait RepositoryCommand: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str;

    /// Runs once before any repository work.
    fn prepare(&mut self, _scm: &dyn SourceCodeManager) -> Result<()> {
        Ok(())
    }

    /// Return a reason to skip `spec` without synchronizing it.
    fn can_skip_repository(
        &self,
        _scm: &dyn SourceCodeManager,
        _spec: &RepositorySpec,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn ensure_repository(&self, scm: &dyn SourceCodeManager, spec: &RepositorySpec) -> Result<()> {
        scm.ensure_local_repository(spec)
    }

    fn process_repository(
        &self,
        scm: &dyn SourceCodeManager,
        spec: &RepositorySpec,
    ) -> Result<Self::Output>;

    /// Runs once after every repository was attempted.
    fn postprocess(
        &mut self,
        _scm: &dyn SourceCodeManager,
        results: RepositoryResults<Self::Output>,
    ) -> Result<RepositoryResults<Self::Output>> {
        Ok(results)
    }
}

/// The step of a repository's unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryStage {
    Resolve,
    Sync,
    Execute,
}

impl fmt::Display for RepositoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepositoryStage::Resolve => "resolve",
            RepositoryStage::Sync => "sync",
            RepositoryStage::Execute => "execute",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct RepositoryFailure {
    pub stage: RepositoryStage,
    pub error: Error,
}

#[derive(Debug)]
pub enum RepositoryOutcome<T> {
    Completed(T),
    Failed(RepositoryFailure),
    Skipped(String),
}

impl<T> RepositoryOutcome<T> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            RepositoryOutcome::Completed(_) => OutcomeKind::Succeeded,
            RepositoryOutcome::Failed(_) => OutcomeKind::Failed,
            RepositoryOutcome::Skipped(_) => OutcomeKind::Skipped,
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            RepositoryOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&RepositoryFailure> {
        match self {
            RepositoryOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Outcomes keyed by repository name.
pub type RepositoryResults<T> = BTreeMap<String, RepositoryOutcome<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Preprocess,
    FanOut,
    Postprocess,
    Done,
    Failed,
}

/// Whether a repository failure fails the command as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    TolerateFailures,
    RequireFullSuccess,
}

#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub max_parallelism: usize,
    pub one_at_a_time: bool,
    /// Allow-list of repository names. Empty means no filtering.
    pub only_repositories: Vec<String>,
    pub failure_policy: FailurePolicy,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_parallelism: crate::defaults::DEFAULT_MAX_PARALLELISM,
            one_at_a_time: false,
            only_repositories: Vec::new(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct CommandResult<T> {
    pub command: String,
    pub results: RepositoryResults<T>,
    pub summary: CommandSummary,
}

impl<T> CommandResult<T> {
    pub fn failures(&self) -> impl Iterator<Item = (&String, &RepositoryFailure)> {
        self.results
            .iter()
            .filter_map(|(name, outcome)| outcome.failure().map(|failure| (name, failure)))
    }

    pub fn completed(&self) -> impl Iterator<Item = (&String, &T)> {
        self.results
            .iter()
            .filter_map(|(name, outcome)| outcome.completed().map(|value| (name, value)))
    }
}

fn summarize<T>(results: &RepositoryResults<T>) -> CommandSummary {
    let mut summary = CommandSummary::default();
    for outcome in results.values() {
        summary.record(outcome.kind());
    }
    summary
}

/// Keep the specs named in `only` (all of them when `only` is empty).
///
/// Names in `only` that were not resolved are dropped. Duplicate specs
/// collapse to the first one.
pub fn filter_repositories(specs: Vec<RepositorySpec>, only: &[String]) -> Vec<RepositorySpec> {
    let wanted: HashSet<&str> = only.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();
    for spec in specs {
        if !seen.insert(spec.name.clone()) {
            debug!("Ignoring duplicate repository {}", spec.name);
            continue;
        }
        if wanted.is_empty() || wanted.contains(spec.name.as_str()) {
            selected.push(spec);
        }
    }
    for name in only {
        if !seen.contains(name) {
            debug!("Repository {} is not in the resolved set, ignoring it", name);
        }
    }
    selected
}

/// Drives one `RepositoryCommand` across the repositories of a
/// `SourceCodeManager`.
pub struct RepositoryCommandProcessor<C: RepositoryCommand> {
    command: C,
    scm: Box<dyn SourceCodeManager>,
    options: ProcessorOptions,
    metrics: Arc<dyn MetricsSink>,
    state: CommandState,
}

impl<C: RepositoryCommand> RepositoryCommandProcessor<C> {
    pub fn new(command: C, scm: Box<dyn SourceCodeManager>, options: ProcessorOptions) -> Self {
        Self {
            command,
            scm,
            options,
            metrics: Arc::new(NoopMetrics),
            state: CommandState::Created,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn scm(&self) -> &dyn SourceCodeManager {
        self.scm.as_ref()
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    pub fn into_command(self) -> C {
        self.command
    }

    fn transition(&mut self, state: CommandState) {
        debug!(
            "{}: {:?} -> {:?}",
            self.command.name(),
            self.state,
            state
        );
        self.state = state;
    }

    fn fail(&mut self, stage: &str, e: Error) -> Error {
        error!("{} failed during {}: {}", self.command.name(), stage, e);
        self.transition(CommandState::Failed);
        e
    }

    pub fn run(&mut self) -> Result<CommandResult<C::Output>> {
        let started = Instant::now();
        let name = self.command.name().to_string();

        self.transition(CommandState::Preprocess);
        if let Err(e) = self.command.prepare(self.scm.as_ref()) {
            return Err(self.fail("preprocess", e));
        }
        let specs = match self.scm.determine_source_repositories() {
            Ok(specs) => filter_repositories(specs, &self.options.only_repositories),
            Err(e) => return Err(self.fail("preprocess", e)),
        };

        self.transition(CommandState::FanOut);
        self.metrics.record_fan_out(&name, specs.len());
        let results = match self.fan_out(&specs) {
            Ok(results) => results,
            Err(e) => return Err(self.fail("fan-out", e)),
        };

        let summary = summarize(&results);
        if self.options.failure_policy == FailurePolicy::RequireFullSuccess && summary.has_failures() {
            self.metrics
                .record_command_outcome(&name, &summary, started.elapsed());
            let failures = results
                .iter()
                .filter_map(|(repo, outcome)| {
                    outcome.failure().map(|f| (repo.clone(), f.error.to_string()))
                })
                .collect();
            self.transition(CommandState::Failed);
            return Err(Error::RepositoryFailures {
                command: name,
                attempted: results.len(),
                failures,
            });
        }

        self.transition(CommandState::Postprocess);
        let results = match self.command.postprocess(self.scm.as_ref(), results) {
            Ok(results) => results,
            Err(e) => {
                self.metrics
                    .record_command_outcome(&name, &summary, started.elapsed());
                return Err(self.fail("postprocess", e));
            }
        };

        let summary = summarize(&results);
        self.metrics
            .record_command_outcome(&name, &summary, started.elapsed());
        self.transition(CommandState::Done);
        Ok(CommandResult {
            command: name,
            results,
            summary,
        })
    }

    fn fan_out(&self, specs: &[RepositorySpec]) -> Result<RepositoryResults<C::Output>> {
        let results: Mutex<RepositoryResults<C::Output>> = Mutex::new(BTreeMap::new());
        let halted = AtomicBool::new(false);

        let work = |spec: &RepositorySpec| {
            let outcome = if halted.load(Ordering::SeqCst) {
                RepositoryOutcome::Skipped("halted after abuse protection was triggered".to_string())
            } else {
                self.process_one(spec)
            };
            if let RepositoryOutcome::Failed(failure) = &outcome {
                if failure.error.is_abuse_protection() && !halted.swap(true, Ordering::SeqCst) {
                    warn!(
                        "{}: abuse protection triggered by {}, not starting any more repositories",
                        self.command.name(),
                        spec.name
                    );
                }
            }
            match results.lock() {
                Ok(mut map) => map.insert(spec.name.clone(), outcome),
                Err(poisoned) => poisoned.into_inner().insert(spec.name.clone(), outcome),
            };
        };

        let width = self.options.max_parallelism.min(specs.len()).max(1);
        if self.options.one_at_a_time || width == 1 {
            specs.iter().for_each(work);
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(width)
                .build()
                .map_err(|e| Error::unexpected(format!("Could not start worker pool: {}", e)))?;
            pool.install(|| specs.par_iter().for_each(&work));
        }

        results.into_inner().map_err(|_| Error::LockPoisoned {
            context: format!("{} results", self.command.name()),
        })
    }

    fn process_one(&self, spec: &RepositorySpec) -> RepositoryOutcome<C::Output> {
        let started = Instant::now();
        let scm = self.scm.as_ref();

        let outcome = match self.command.can_skip_repository(scm, spec) {
            Ok(Some(reason)) => {
                debug!("{}: skipping {}: {}", self.command.name(), spec.name, reason);
                RepositoryOutcome::Skipped(reason)
            }
            Err(error) => RepositoryOutcome::Failed(RepositoryFailure {
                stage: RepositoryStage::Resolve,
                error,
            }),
            Ok(None) => match self.command.ensure_repository(scm, spec) {
                Err(error) => RepositoryOutcome::Failed(RepositoryFailure {
                    stage: RepositoryStage::Sync,
                    error,
                }),
                Ok(()) => match self.command.process_repository(scm, spec) {
                    Ok(value) => RepositoryOutcome::Completed(value),
                    Err(error) => RepositoryOutcome::Failed(RepositoryFailure {
                        stage: RepositoryStage::Execute,
                        error,
                    }),
                },
            },
        };

        if let RepositoryOutcome::Failed(failure) = &outcome {
            error!(
                "{} failed for {} during {}: {}",
                self.command.name(),
                spec.name,
                failure.stage,
                failure.error
            );
        }
        self.metrics.record_repository_outcome(
            self.command.name(),
            &spec.name,
            outcome.kind(),
            started.elapsed(),
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitRunner;
    use crate::metrics::OutcomeCounters;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    struct MockScm {
        root: PathBuf,
        git: GitRunner,
        names: Vec<String>,
        resolve_error: bool,
        synced: AtomicUsize,
    }

    impl MockScm {
        fn new(names: &[&str]) -> Self {
            Self {
                root: PathBuf::from("/tmp/mock"),
                git: GitRunner::default(),
                names: names.iter().map(|name| name.to_string()).collect(),
                resolve_error: false,
                synced: AtomicUsize::new(0),
            }
        }
    }

    impl SourceCodeManager for MockScm {
        fn root_dir(&self) -> &Path {
            &self.root
        }

        fn git(&self) -> &GitRunner {
            &self.git
        }

        fn determine_source_repositories(&self) -> Result<Vec<RepositorySpec>> {
            if self.resolve_error {
                return Err(Error::config("Missing --github_owner"));
            }
            Ok(self
                .names
                .iter()
                .map(|name| RepositorySpec::new(name.as_str(), self.local_dir_for(name)))
                .collect())
        }

        fn ensure_local_repository(&self, spec: &RepositorySpec) -> Result<()> {
            if spec.name == "unsyncable" {
                return Err(Error::execution("git", "clone failed", "fatal: repository not found"));
            }
            self.synced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn determine_build_number(&self, _spec: &RepositorySpec) -> Result<String> {
            Ok("1".to_string())
        }

        fn check_repository_is_current(&self, _spec: &RepositorySpec) -> Result<bool> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct EchoCommand {
        fail_on: Vec<String>,
        skip: Vec<String>,
        prepare_error: bool,
        postprocessed: Option<usize>,
    }

    impl RepositoryCommand for EchoCommand {
        type Output = String;

        fn name(&self) -> &str {
            "echo"
        }

        fn prepare(&mut self, _scm: &dyn SourceCodeManager) -> Result<()> {
            if self.prepare_error {
                return Err(Error::config("No BOM"));
            }
            Ok(())
        }

        fn can_skip_repository(
            &self,
            _scm: &dyn SourceCodeManager,
            spec: &RepositorySpec,
        ) -> Result<Option<String>> {
            Ok(self
                .skip
                .contains(&spec.name)
                .then(|| "unchanged".to_string()))
        }

        fn process_repository(
            &self,
            _scm: &dyn SourceCodeManager,
            spec: &RepositorySpec,
        ) -> Result<String> {
            if self.fail_on.contains(&spec.name) {
                return Err(Error::execution("sh", format!("build {}", spec.name), "boom"));
            }
            Ok(format!("built {}", spec.name))
        }

        fn postprocess(
            &mut self,
            _scm: &dyn SourceCodeManager,
            results: RepositoryResults<String>,
        ) -> Result<RepositoryResults<String>> {
            self.postprocessed = Some(results.len());
            Ok(results)
        }
    }

    fn processor(
        command: EchoCommand,
        scm: MockScm,
        options: ProcessorOptions,
    ) -> RepositoryCommandProcessor<EchoCommand> {
        RepositoryCommandProcessor::new(command, Box::new(scm), options)
    }

    #[test]
    fn test_filter_keeps_intersection() {
        let specs: Vec<RepositorySpec> = ["gate", "echo", "fiat"]
            .iter()
            .map(|name| RepositorySpec::new(*name, format!("/tmp/{}", name)))
            .collect();
        let only = vec!["gate".to_string(), "nonexistent".to_string()];
        let selected = filter_repositories(specs.clone(), &only);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "gate");
        assert_eq!(filter_repositories(specs, &[]).len(), 3);
    }

    #[test]
    fn test_filter_collapses_duplicates() {
        let specs = vec![
            RepositorySpec::new("gate", "/tmp/a"),
            RepositorySpec::new("gate", "/tmp/b"),
        ];
        let selected = filter_repositories(specs, &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].git_dir, PathBuf::from("/tmp/a"));
    }

    #[test]
    fn test_only_repositories_selects_exactly_one() {
        let options = ProcessorOptions {
            only_repositories: vec!["gate".to_string()],
            ..ProcessorOptions::default()
        };
        let mut processor = processor(
            EchoCommand::default(),
            MockScm::new(&["gate", "echo", "fiat"]),
            options,
        );
        let result = processor.run().unwrap();
        let names: Vec<&String> = result.results.keys().collect();
        assert_eq!(names, vec!["gate"]);
        assert_eq!(processor.state(), CommandState::Done);
    }

    #[test]
    fn test_failure_is_isolated() {
        let command = EchoCommand {
            fail_on: vec!["echo".to_string()],
            ..EchoCommand::default()
        };
        let mut processor = processor(
            command,
            MockScm::new(&["gate", "echo", "fiat"]),
            ProcessorOptions::default(),
        );
        let result = processor.run().unwrap();

        assert_eq!(result.results.len(), 3);
        assert_eq!(
            result.results["gate"].completed().map(String::as_str),
            Some("built gate")
        );
        assert_eq!(
            result.results["fiat"].completed().map(String::as_str),
            Some("built fiat")
        );
        let failure = result.results["echo"].failure().unwrap();
        assert_eq!(failure.stage, RepositoryStage::Execute);
        assert_eq!(failure.error.classification(), "ExecutionError");
        assert_eq!(result.summary.to_string(), "2 succeeded, 1 failed, 0 skipped");
        assert_eq!(processor.command().postprocessed, Some(3));
    }

    #[test]
    fn test_sync_failure_is_attributed_to_sync_stage() {
        let mut processor = processor(
            EchoCommand::default(),
            MockScm::new(&["gate", "unsyncable"]),
            ProcessorOptions::default(),
        );
        let result = processor.run().unwrap();
        let failure = result.results["unsyncable"].failure().unwrap();
        assert_eq!(failure.stage, RepositoryStage::Sync);
        assert_eq!(result.failures().count(), 1);
        assert_eq!(result.completed().count(), 1);
    }

    #[test]
    fn test_require_full_success_aggregates_failures() {
        let command = EchoCommand {
            fail_on: vec!["echo".to_string(), "fiat".to_string()],
            ..EchoCommand::default()
        };
        let options = ProcessorOptions {
            failure_policy: FailurePolicy::RequireFullSuccess,
            ..ProcessorOptions::default()
        };
        let mut processor = processor(command, MockScm::new(&["gate", "echo", "fiat"]), options);
        let err = processor.run().unwrap_err();

        match &err {
            Error::RepositoryFailures {
                command,
                attempted,
                failures,
            } => {
                assert_eq!(command, "echo");
                assert_eq!(*attempted, 3);
                let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
                assert_eq!(names, vec!["echo", "fiat"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(processor.state(), CommandState::Failed);
        assert_eq!(processor.command().postprocessed, None);
    }

    #[test]
    fn test_prepare_error_aborts_before_any_work() {
        let command = EchoCommand {
            prepare_error: true,
            ..EchoCommand::default()
        };
        let scm = MockScm::new(&["gate", "echo"]);
        let mut processor = processor(command, scm, ProcessorOptions::default());
        let err = processor.run().unwrap_err();
        assert_eq!(err.classification(), "ConfigError");
        assert_eq!(processor.state(), CommandState::Failed);
    }

    #[test]
    fn test_resolve_error_aborts() {
        let mut scm = MockScm::new(&["gate"]);
        scm.resolve_error = true;
        let mut processor = processor(EchoCommand::default(), scm, ProcessorOptions::default());
        assert!(processor.run().is_err());
        assert_eq!(processor.state(), CommandState::Failed);
    }

    #[test]
    fn test_skipped_repositories_are_counted() {
        let command = EchoCommand {
            skip: vec!["fiat".to_string()],
            ..EchoCommand::default()
        };
        let counters = Arc::new(OutcomeCounters::new());
        let mut processor = processor(
            command,
            MockScm::new(&["gate", "echo", "fiat"]),
            ProcessorOptions::default(),
        )
        .with_metrics(counters.clone());
        let result = processor.run().unwrap();

        assert!(matches!(result.results["fiat"], RepositoryOutcome::Skipped(_)));
        assert_eq!(result.summary.to_string(), "2 succeeded, 0 failed, 1 skipped");
        assert_eq!(counters.snapshot(), result.summary);
        assert_eq!(counters.commands(), 1);
    }

    #[test]
    fn test_one_at_a_time_runs_everything() {
        let options = ProcessorOptions {
            one_at_a_time: true,
            ..ProcessorOptions::default()
        };
        let mut processor = processor(
            EchoCommand::default(),
            MockScm::new(&["a", "b", "c", "d"]),
            options,
        );
        let result = processor.run().unwrap();
        assert_eq!(result.summary.succeeded, 4);
    }

    struct AbusedCommand;

    impl RepositoryCommand for AbusedCommand {
        type Output = ();

        fn name(&self) -> &str {
            "tag_versions"
        }

        fn process_repository(&self, _scm: &dyn SourceCodeManager, spec: &RepositorySpec) -> Result<()> {
            if spec.name == "a" {
                return Err(Error::execution(
                    "git",
                    "push origin version-1.0.0",
                    "remote: You have triggered an abuse detection mechanism.",
                ));
            }
            Ok(())
        }
    }

    #[test]
    fn test_abuse_protection_halts_remaining_work() {
        let options = ProcessorOptions {
            one_at_a_time: true,
            ..ProcessorOptions::default()
        };
        let mut processor = RepositoryCommandProcessor::new(
            AbusedCommand,
            Box::new(MockScm::new(&["a", "b", "c"])),
            options,
        );
        let result = processor.run().unwrap();
        assert!(result.results["a"].failure().is_some());
        assert!(matches!(result.results["b"], RepositoryOutcome::Skipped(_)));
        assert!(matches!(result.results["c"], RepositoryOutcome::Skipped(_)));
        assert_eq!(result.summary.to_string(), "0 succeeded, 1 failed, 2 skipped");
    }
}
