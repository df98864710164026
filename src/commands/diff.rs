//! `diff`: show what `apply` would change, as a git-style patch.
use std::sync::Arc;

use anyhow::Result;

use super::context::EngineContext;
use crate::cli::TargetOpts;
use crate::engine::{ApplyOptions, apply_targets};
use crate::logging::Log;
use crate::state::StateMode;
use crate::system::{DryRunSystem, GitDiffSystem, System};

/// Run `diff`.
///
/// Mutations are rendered onto the command output and swallowed; the
/// persistent state is read but never written.
///
/// # Errors
///
/// Returns an error if the source state cannot be read or a target cannot
/// be computed.
pub fn run(ctx: &mut EngineContext, opts: &TargetOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(source_system)?;
    let rels = ctx.select(&source, &opts.paths, opts.recursive)?;
    let system = GitDiffSystem::new(
        Box::new(DryRunSystem::new(ctx.system(false))),
        Box::new(ctx.output.clone()),
        ctx.dest_dir.clone(),
    );
    let mut state = ctx.open_state(StateMode::ReadMockWrite)?;

    log.debug(&format!("diffing {} target(s)", rels.len()));
    let mut options = ApplyOptions::new(ctx.dest_dir.clone());
    options.filter = opts.filter.filter();
    apply_targets(
        &source,
        &system,
        state.as_mut(),
        &rels,
        &mut options,
        false,
        &mut |_| {},
    )?;
    Ok(())
}
