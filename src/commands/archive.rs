//! `archive`: the target state as a tar stream.
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::ArchiveOpts;
use crate::engine::{ApplyOptions, apply_targets};
use crate::logging::Log;
use crate::state::MemoryState;
use crate::system::{System, TarWriterSystem};

/// Run `archive`, writing to `--output` or the command output.
///
/// # Errors
///
/// Returns an error if the source state cannot be read, a target cannot
/// be computed, or the archive cannot be written.
pub fn run(ctx: &mut EngineContext, opts: &ArchiveOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(source_system)?;
    let targets = &opts.targets;
    let rels = ctx.select(&source, &targets.paths, targets.recursive)?;

    let writer: Box<dyn Write + Send> = match &opts.output {
        Some(path) => {
            let path = ctx.working_dir.as_path().join(path);
            log.debug(&format!("writing archive to {}", path.display()));
            Box::new(
                std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?,
            )
        }
        None => Box::new(ctx.output.clone()),
    };
    let system = TarWriterSystem::new(writer, opts.resolved_format(), ctx.dest_dir.clone());

    let mut options = ApplyOptions::new(ctx.dest_dir.clone());
    options.filter = targets.filter.filter();
    apply_targets(
        &source,
        &system,
        &mut MemoryState::new(),
        &rels,
        &mut options,
        false,
        &mut |_| {},
    )?;
    system.finish()?;
    Ok(())
}
