//! `state`: inspect and reset the persistent state.
use std::io::Write;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use crate::cli::{StateCommand, StateOpts};
use crate::logging::Log;
use crate::state::{self, BUCKETS, StateMode};

/// Run a `state` action.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, read or written, or
/// the named bucket is unknown.
pub fn run(ctx: &mut EngineContext, opts: &StateOpts, log: &dyn Log) -> Result<()> {
    match &opts.command {
        StateCommand::Dump => {
            let store = ctx.open_state(StateMode::ReadOnly)?;
            let dump = state::dump(store.as_ref())?;
            let json = serde_json::to_string_pretty(&dump).context("serializing state")?;
            writeln!(ctx.output, "{json}").context("writing state")?;
        }
        StateCommand::DeleteBucket { bucket } => {
            anyhow::ensure!(
                BUCKETS.contains(&bucket.as_str()),
                "{bucket}: unknown bucket (expected one of {})",
                BUCKETS.join(", ")
            );
            let mut store = ctx.open_state(StateMode::ReadWrite)?;
            store.delete_bucket(bucket)?;
            store.close()?;
            log.info(&format!("deleted bucket {bucket}"));
        }
        StateCommand::Reset => {
            let mut store = ctx.open_state(StateMode::ReadWrite)?;
            for bucket in BUCKETS {
                store.delete_bucket(bucket)?;
            }
            store.close()?;
            log.info("persistent state reset");
        }
    }
    Ok(())
}
