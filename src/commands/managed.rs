//! `managed`: list target paths.
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::ManagedOpts;
use crate::system::System;

/// Run `managed`, printing each target path matching the filter in apply
/// order.
///
/// # Errors
///
/// Returns an error if the source state cannot be read or a target cannot
/// be computed.
pub fn run(ctx: &mut EngineContext, opts: &ManagedOpts) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(source_system)?;
    let filter = opts.filter.filter();
    let target_ctx = source.target_context();
    for rel in source.target_rel_paths() {
        let Some(entry) = source.entry(&rel) else {
            continue;
        };
        if !filter.includes_source(entry) {
            continue;
        }
        let target = entry.target(&target_ctx).map_err(|e| e.at(&rel))?;
        if filter.includes_target(target) {
            writeln!(ctx.output, "{rel}").context("writing managed paths")?;
        }
    }
    Ok(())
}
