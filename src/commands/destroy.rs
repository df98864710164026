//! `destroy`: delete targets everywhere.
use std::sync::Arc;

use anyhow::Result;

use super::context::EngineContext;
use super::prompt::Confirm;
use crate::cli::DestroyOpts;
use crate::logging::{EntryOutcome, Log};
use crate::source::SourceStateEntry;
use crate::state::{self, StateMode};
use crate::system::System;

/// Run `destroy`: remove each target from the destination, its source
/// entry from the source directory, and its history. Children go before
/// their parents.
///
/// Targets synthesized by an `exact_` directory have no source entry;
/// only their destination and history are removed.
///
/// # Errors
///
/// Returns an error if a target is unmanaged, a removal fails, or the run
/// is cancelled.
pub fn run(ctx: &mut EngineContext, opts: &DestroyOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let mut rels = ctx.select(&source, &opts.paths, opts.recursive)?;
    rels.sort_by(|a, b| b.cmp(a));
    let dest = ctx.system(false);
    let mut state = ctx.open_state(StateMode::ReadWrite)?;

    let (dest_dir, source_dir, dry_run) = (
        ctx.dest_dir.clone(),
        ctx.source_dir.clone(),
        ctx.flags.dry_run,
    );
    let mut confirm = Confirm::new(ctx.prompter.as_mut(), ctx.flags.force);
    for rel in &rels {
        let dest_path = dest_dir.join(rel);
        let source_path = match source.entry(rel) {
            Some(SourceStateEntry::Remove(_)) | None => None,
            Some(entry) => Some(source_dir.join(entry.source_rel_path().rel_path())),
        };
        let question = source_path.as_ref().map_or_else(
            || format!("Destroy {dest_path}"),
            |s| format!("Destroy {dest_path} and {s}"),
        );
        if !confirm.ask(&question)? {
            log.record_entry(rel.as_str(), EntryOutcome::Skipped, Some("declined"));
            continue;
        }
        dest.remove_all(&dest_path)?;
        if let Some(source_path) = &source_path {
            source_system.remove_all(source_path)?;
        }
        state::delete_entry_states(state.as_mut(), &dest_path)?;
        if dry_run {
            log.dry_run(&format!("destroy {rel}"));
        } else {
            log.info(&format!("destroyed {rel}"));
        }
    }
    state.close()?;
    Ok(())
}
