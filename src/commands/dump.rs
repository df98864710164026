//! `dump`: the target state as JSON.
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::TargetOpts;
use crate::engine::{ApplyOptions, apply_targets};
use crate::state::NullState;
use crate::system::{DumpSystem, System};

/// Run `dump`.
///
/// # Errors
///
/// Returns an error if the source state cannot be read or a target cannot
/// be computed.
pub fn run(ctx: &mut EngineContext, opts: &TargetOpts) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(source_system)?;
    let rels = ctx.select(&source, &opts.paths, opts.recursive)?;
    let system = DumpSystem::new(ctx.dest_dir.clone());

    let mut options = ApplyOptions::new(ctx.dest_dir.clone());
    options.filter = opts.filter.filter();
    apply_targets(
        &source,
        &system,
        &mut NullState,
        &rels,
        &mut options,
        false,
        &mut |_| {},
    )?;

    let json = serde_json::to_string_pretty(&system.data()).context("serializing target state")?;
    writeln!(ctx.output, "{json}").context("writing target state")?;
    Ok(())
}
