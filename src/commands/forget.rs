//! `forget`: stop managing targets without touching the destination.
use std::sync::Arc;

use anyhow::Result;

use super::context::EngineContext;
use super::prompt::Confirm;
use crate::cli::PathsOpts;
use crate::logging::{EntryOutcome, Log};
use crate::source::SourceStateEntry;
use crate::state::{self, StateMode};
use crate::system::System;

/// Run `forget`: remove each target's source entry and history.
///
/// # Errors
///
/// Returns an error if a target is unmanaged or has no source entry of
/// its own, a removal fails, or the run is cancelled.
pub fn run(ctx: &mut EngineContext, opts: &PathsOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let mut rels = ctx.select(&source, &opts.paths, false)?;
    rels.sort_by(|a, b| b.cmp(a));
    let mut state = ctx.open_state(StateMode::ReadWrite)?;

    let (dest_dir, source_dir, dry_run) = (
        ctx.dest_dir.clone(),
        ctx.source_dir.clone(),
        ctx.flags.dry_run,
    );
    let mut confirm = Confirm::new(ctx.prompter.as_mut(), ctx.flags.force);
    for rel in &rels {
        let source_path = match source.entry(rel) {
            Some(SourceStateEntry::Remove(_)) | None => {
                anyhow::bail!("{rel}: not in source state");
            }
            Some(entry) => source_dir.join(entry.source_rel_path().rel_path()),
        };
        let dest_path = dest_dir.join(rel);
        if !confirm.ask(&format!("Forget {dest_path}"))? {
            log.record_entry(rel.as_str(), EntryOutcome::Skipped, Some("declined"));
            continue;
        }
        source_system.remove_all(&source_path)?;
        state::delete_entry_states(state.as_mut(), &dest_path)?;
        if dry_run {
            log.dry_run(&format!("forget {rel}"));
        } else {
            log.info(&format!("forgot {rel}"));
        }
    }
    state.close()?;
    Ok(())
}
