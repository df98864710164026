//! Subcommand handlers.
//!
//! Each handler resolves what it needs from an [`EngineContext`], builds
//! the system decorators and state mode its command calls for, and runs
//! one engine operation. Errors are reported as [`anyhow::Error`].
pub mod add;
pub mod apply;
pub mod archive;
pub mod chattr;
pub mod context;
pub mod destroy;
pub mod diff;
pub mod dump;
pub mod forget;
pub mod managed;
pub mod merge;
pub mod prompt;
pub mod state;
pub mod status;
pub mod version;

use anyhow::Result;

pub use context::{CONFIG_FILE_NAME, Captured, EngineContext, Flags, Output, STATE_FILE_NAME};
pub use prompt::{Confirm, Prompter, TerminalPrompter};

use crate::cli::{Cli, Command};
use crate::logging::Log;

/// Run the command line.
///
/// # Errors
///
/// Returns the command's error. A cancelled prompt is returned as an
/// error carrying [`crate::error::Flow::Cancel`]; see
/// [`crate::error::is_cancel`].
pub fn run(cli: &Cli, log: &dyn Log) -> Result<()> {
    if matches!(cli.command, Command::Version) {
        return version::run(&mut Output::stdout());
    }
    let mut ctx = EngineContext::from_env(&cli.global, cli.verbose)?;
    dispatch(&mut ctx, &cli.command, log)
}

/// Run `command` against an already-resolved context.
///
/// # Errors
///
/// Returns the command's error.
pub fn dispatch(ctx: &mut EngineContext, command: &Command, log: &dyn Log) -> Result<()> {
    match command {
        Command::Apply(opts) => apply::run(ctx, opts, log),
        Command::Add(opts) => add::run(ctx, opts, log),
        Command::Diff(opts) => diff::run(ctx, opts, log),
        Command::Status(opts) => status::run(ctx, opts, log),
        Command::Merge(opts) => merge::run(ctx, opts, log),
        Command::Destroy(opts) => destroy::run(ctx, opts, log),
        Command::Forget(opts) => forget::run(ctx, opts, log),
        Command::Chattr(opts) => chattr::run(ctx, opts, log),
        Command::Archive(opts) => archive::run(ctx, opts, log),
        Command::Dump(opts) => dump::run(ctx, opts),
        Command::State(opts) => state::run(ctx, opts, log),
        Command::Managed(opts) => managed::run(ctx, opts),
        Command::Version => version::run(&mut ctx.output),
    }
}
