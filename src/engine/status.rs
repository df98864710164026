//! Two-column status, computed by an apply that never writes.
use std::fmt;

use crate::entry_state::EntryStateKind;
use crate::error::{EngineError, EngineResult, Flow};
use crate::path::{AbsPath, RelPath};
use crate::source::SourceState;
use crate::state::PersistentState;
use crate::system::System;

use super::apply::{ApplyOptions, PreApply, apply_targets, status_rune};
use super::filter::EntryFilter;

/// One line of `status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// Change since the last write: last written to actual.
    pub x: char,
    /// Change the next apply would make: actual to target.
    pub y: char,
    /// Target-relative path.
    pub path: RelPath,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.x, self.y, self.path)
    }
}

/// Compute the status of `rels`. Paths with nothing to report are omitted.
///
/// `system` and `state` should be non-writing: a dry-run system and a
/// mock-write copy of the persistent state.
///
/// # Errors
///
/// Returns the first error computing a target or reading the destination.
pub fn status(
    source: &SourceState,
    system: &dyn System,
    state: &mut dyn PersistentState,
    target_dir: &AbsPath,
    rels: &[RelPath],
    filter: EntryFilter,
) -> EngineResult<Vec<StatusLine>> {
    let mut lines = Vec::new();
    let mut options = ApplyOptions::new(target_dir.clone());
    options.filter = filter;
    options.pre_apply = Some(Box::new(|info: &PreApply<'_>| {
        let x = status_rune(info.last_written, info.actual);
        let y = if info.target.kind == EntryStateKind::Script {
            'R'
        } else {
            status_rune(Some(info.actual), info.target)
        };
        if x != ' ' || y != ' ' {
            lines.push(StatusLine {
                x,
                y,
                path: info.target_rel_path.clone(),
            });
        }
        Err(EngineError::Flow(Flow::Skip))
    }));
    apply_targets(source, system, state, rels, &mut options, false, &mut |_| {})?;
    drop(options);
    Ok(lines)
}
