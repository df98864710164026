//! `chattr`: rename source entries to change their attributes.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::ChattrOpts;
use crate::engine::{Modifier, chattr};
use crate::logging::Log;
use crate::system::System;

/// Run `chattr`.
///
/// # Errors
///
/// Returns an error if the modifier is invalid, a target is unmanaged, or
/// a source entry cannot be renamed.
pub fn run(ctx: &mut EngineContext, opts: &ChattrOpts, log: &dyn Log) -> Result<()> {
    let modifier = Modifier::parse(&opts.modifier)
        .with_context(|| format!("invalid modifier {}", opts.modifier))?;
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let rels = ctx.select(&source, &opts.paths, opts.recursive)?;

    for rel in chattr(&source, source_system.as_ref(), &modifier, &rels)? {
        if ctx.flags.dry_run {
            log.dry_run(&format!("chattr {rel}"));
        } else {
            log.info(&format!("changed {rel}"));
        }
    }
    Ok(())
}
