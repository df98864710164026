//! `status`: two columns per target, like `git status --short`.
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::TargetOpts;
use crate::engine::status;
use crate::logging::Log;
use crate::state::StateMode;
use crate::system::{DryRunSystem, System};

/// Run `status`.
///
/// The first column compares the last written state with the destination,
/// the second the destination with the target.
///
/// # Errors
///
/// Returns an error if the source state cannot be read or the output
/// cannot be written.
pub fn run(ctx: &mut EngineContext, opts: &TargetOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(source_system)?;
    let rels = ctx.select(&source, &opts.paths, opts.recursive)?;
    let system = DryRunSystem::new(ctx.system(false));
    let mut state = ctx.open_state(StateMode::ReadMockWrite)?;

    let lines = status(
        &source,
        &system,
        state.as_mut(),
        &ctx.dest_dir,
        &rels,
        opts.filter.filter(),
    )?;
    log.debug(&format!("{} of {} target(s) differ", lines.len(), rels.len()));
    for line in &lines {
        writeln!(ctx.output, "{line}").context("writing status")?;
    }
    Ok(())
}
