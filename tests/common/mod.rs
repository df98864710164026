// Shared helpers for integration tests.
//
// Provides a temporary home directory with a source directory, config file
// and state file inside it, a scripted prompter and a recording log, so
// each integration test can drive commands end to end without touching the
// real home directory or a terminal.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use dotstate::cli::Cli;
use dotstate::commands::{self, Captured, EngineContext, Output, Prompter};
use dotstate::engine::ApplyStats;
use dotstate::error::{EngineError, EngineResult, Flow};
use dotstate::logging::{EntryOutcome, Log};

/// Answers questions from a fixed script and records what was asked.
///
/// Running out of answers cancels, like end of input on a terminal.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    answers: Arc<Mutex<VecDeque<&'static str>>>,
    questions: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPrompter {
    /// A prompter that will give `answers` in order.
    pub fn new(answers: &[&'static str]) -> Self {
        Self {
            answers: Arc::new(Mutex::new(answers.iter().copied().collect())),
            questions: Arc::default(),
        }
    }

    /// Every question asked so far.
    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn choice(&mut self, question: &str, choices: &[&'static str]) -> EngineResult<&'static str> {
        self.questions.lock().unwrap().push(question.to_string());
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(EngineError::Flow(Flow::Cancel))?;
        assert!(
            choices.contains(&answer),
            "{answer} is not one of {choices:?} for {question}"
        );
        Ok(answer)
    }
}

/// Records everything logged.
#[derive(Debug, Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<String>>,
    entries: Mutex<Vec<(String, EntryOutcome)>>,
}

impl RecordingLog {
    /// Every message, prefixed with its level.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Every per-path outcome.
    pub fn entries(&self) -> Vec<(String, EntryOutcome)> {
        self.entries.lock().unwrap().clone()
    }

    fn push(&self, level: &str, msg: &str) {
        self.lines.lock().unwrap().push(format!("{level}: {msg}"));
    }
}

impl Log for RecordingLog {
    fn stage(&self, msg: &str) {
        self.push("stage", msg);
    }
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }
    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
    fn warn(&self, msg: &str) {
        self.push("warn", msg);
    }
    fn error(&self, msg: &str) {
        self.push("error", msg);
    }
    fn dry_run(&self, msg: &str) {
        self.push("dry-run", msg);
    }
    fn record_entry(&self, path: &str, outcome: EntryOutcome, _message: Option<&str>) {
        self.entries
            .lock()
            .unwrap()
            .push((path.to_string(), outcome));
    }
    fn print_summary(&self, stats: &ApplyStats) {
        self.push("summary", &stats.summary());
    }
}

/// The result of running one command.
pub struct Run {
    /// The command's result.
    pub result: anyhow::Result<()>,
    /// Everything written to the command output.
    pub output: String,
    /// What was logged.
    pub log: RecordingLog,
}

impl Run {
    /// The output, asserting the command succeeded.
    pub fn ok(self) -> String {
        if let Err(e) = &self.result {
            panic!("command failed: {e:#}");
        }
        self.output
    }

    /// The error, asserting the command failed.
    pub fn err(self) -> anyhow::Error {
        self.result.expect_err("command should fail")
    }
}

/// An isolated home directory backed by a [`tempfile::TempDir`].
///
/// Layout:
/// - `home/`                            destination directory
/// - `home/.local/share/dotstate/`      source directory
/// - `home/.config/dotstate/`           config file and state file
pub struct IntegrationTestContext {
    /// Temporary directory holding everything.
    pub root: tempfile::TempDir,
    home: PathBuf,
}

impl IntegrationTestContext {
    /// Create an empty home with an empty source directory.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        let home = dunce::canonicalize(root.path()).unwrap().join("home");
        std::fs::create_dir_all(home.join(".local/share/dotstate")).unwrap();
        std::fs::create_dir_all(home.join(".config/dotstate")).unwrap();
        Self { root, home }
    }

    /// The destination directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The source directory.
    pub fn source_dir(&self) -> PathBuf {
        self.home.join(".local/share/dotstate")
    }

    /// The config file.
    pub fn config_file(&self) -> PathBuf {
        self.home.join(".config/dotstate/dotstate.toml")
    }

    /// The persistent state file.
    pub fn state_file(&self) -> PathBuf {
        self.home.join(".config/dotstate/dotstate.db")
    }

    /// Write `contents` to `rel` under `base`, creating parents.
    fn write(base: &Path, rel: &str, contents: &str) {
        let path = base.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Write a source file.
    pub fn write_source(&self, rel: &str, contents: &str) {
        Self::write(&self.source_dir(), rel, contents);
    }

    /// Write a destination file.
    pub fn write_dest(&self, rel: &str, contents: &str) {
        Self::write(&self.home, rel, contents);
    }

    /// Read a destination file, if it exists.
    pub fn read_dest(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.home.join(rel)).ok()
    }

    /// Whether `rel` exists in the destination, without following links.
    pub fn dest_exists(&self, rel: &str) -> bool {
        std::fs::symlink_metadata(self.home.join(rel)).is_ok()
    }

    /// Whether `rel` exists in the source directory.
    pub fn source_exists(&self, rel: &str) -> bool {
        std::fs::symlink_metadata(self.source_dir().join(rel)).is_ok()
    }

    /// Names directly inside the source directory, sorted.
    pub fn source_names(&self, rel: &str) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.source_dir().join(rel))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Run `dotstate <args>` with this home, answering prompts from
    /// `prompter`.
    pub fn run_with(&self, args: &[&str], prompter: ScriptedPrompter) -> Run {
        let mut argv = vec!["dotstate".to_string()];
        argv.extend(args.iter().map(ToString::to_string));
        for (flag, path) in [
            ("--config", self.config_file()),
            ("--source", self.source_dir()),
            ("--persistent-state", self.state_file()),
        ] {
            argv.push(flag.to_string());
            argv.push(path.to_string_lossy().into_owned());
        }
        let cli = Cli::try_parse_from(argv).expect("parse arguments");

        let (output, captured): (Output, Captured) = Output::capture();
        let log = RecordingLog::default();
        let result = EngineContext::new(&cli.global, cli.verbose, &self.home, &self.home)
            .map(|ctx| ctx.with_prompter(Box::new(prompter)).with_output(output))
            .and_then(|mut ctx| commands::dispatch(&mut ctx, &cli.command, &log));
        Run {
            result,
            output: captured.contents(),
            log,
        }
    }

    /// Run `dotstate <args>` with no answers available.
    pub fn run(&self, args: &[&str]) -> Run {
        self.run_with(args, ScriptedPrompter::default())
    }
}

/// Fluent builder for [`IntegrationTestContext`].
pub struct TestContextBuilder {
    ctx: IntegrationTestContext,
}

impl TestContextBuilder {
    /// Begin building an empty home.
    pub fn new() -> Self {
        Self {
            ctx: IntegrationTestContext::new(),
        }
    }

    /// Add a source file.
    pub fn with_source(self, rel: &str, contents: &str) -> Self {
        self.ctx.write_source(rel, contents);
        self
    }

    /// Add a destination file.
    pub fn with_dest(self, rel: &str, contents: &str) -> Self {
        self.ctx.write_dest(rel, contents);
        self
    }

    /// Write the config file.
    pub fn with_config(self, contents: &str) -> Self {
        std::fs::write(self.ctx.config_file(), contents).unwrap();
        self
    }

    /// Finish building and return the configured context.
    pub fn build(self) -> IntegrationTestContext {
        self.ctx
    }
}
