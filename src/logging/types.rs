//! Core logging types: per-path records and the [`Log`] trait.
use crate::engine::ApplyStats;

/// A per-path outcome worth repeating in the summary.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    /// Target-relative path.
    pub path: String,
    /// What happened.
    pub outcome: EntryOutcome,
    /// Optional detail, such as the error.
    pub message: Option<String>,
}

/// Outcome of one path that did not simply converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Left alone at a prompt.
    Skipped,
    /// Failed under keep-going.
    Failed,
}

/// Abstraction over logging backends, so command code can log without
/// holding a concrete [`Logger`](super::logger::Logger).
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log something a dry run would have done.
    fn dry_run(&self, msg: &str);
    /// Record a per-path outcome for the summary.
    fn record_entry(&self, path: &str, outcome: EntryOutcome, message: Option<&str>);
    /// Print the recorded outcomes and run counters.
    fn print_summary(&self, stats: &ApplyStats);
}
