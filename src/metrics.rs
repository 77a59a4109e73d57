//! Outcome reporting hook for the command processor.
//!
//! The processor reports every repository outcome and the final command
//! outcome to a `MetricsSink` it is handed at construction time. Publishing
//! backends live outside this crate; `NoopMetrics` is the default and
//! `OutcomeCounters` keeps simple totals.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How one repository's unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Succeeded => "succeeded",
            OutcomeKind::Failed => "failed",
            OutcomeKind::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Per-command totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CommandSummary {
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Succeeded => self.succeeded += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for CommandSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}

/// Receives outcomes from the command processor.
///
/// Methods are called from worker threads, so implementations must use atomics
/// or locks for any state they keep.
pub trait MetricsSink: Send + Sync {
    /// Called once before the fan-out with the number of selected repositories.
    fn record_fan_out(&self, _command: &str, _repositories: usize) {}

    fn record_repository_outcome(
        &self,
        command: &str,
        repository: &str,
        outcome: OutcomeKind,
        duration: Duration,
    );

    fn record_command_outcome(&self, command: &str, summary: &CommandSummary, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_repository_outcome(&self, _: &str, _: &str, _: OutcomeKind, _: Duration) {}

    fn record_command_outcome(&self, _: &str, _: &CommandSummary, _: Duration) {}
}

/// Counts outcomes across all commands it is attached to.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    commands: AtomicUsize,
}

impl OutcomeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CommandSummary {
        CommandSummary {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }

    /// Number of completed commands.
    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }
}

impl MetricsSink for OutcomeCounters {
    fn record_repository_outcome(&self, _: &str, _: &str, outcome: OutcomeKind, _: Duration) {
        let counter = match outcome {
            OutcomeKind::Succeeded => &self.succeeded,
            OutcomeKind::Failed => &self.failed,
            OutcomeKind::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn record_command_outcome(&self, _: &str, _: &CommandSummary, _: Duration) {
        self.commands.fetch_add(1, Ordering::SeqCst);
    }
}
