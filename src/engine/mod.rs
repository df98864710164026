//! The reconciliation algorithms: apply, add, status and chattr.
//!
//! Everything here works against [`System`](crate::system::System) and
//! [`PersistentState`](crate::state::PersistentState) trait objects, so the
//! same code path serves real runs, dry runs, diffs and archives.
mod add;
mod apply;
mod chattr;
mod filter;
mod status;

use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult};
use crate::path::{AbsPath, RelPath};
use crate::source::SourceState;

pub use add::{AddOptions, PreAdd, PreAddFn, add};
pub use apply::{
    ApplyOptions, ApplyStats, PreApply, PreApplyFn, apply_target, apply_targets, post_apply,
    status_rune,
};
pub use chattr::{Change, Modifier, ModifierError, chattr};
pub use filter::{EntryFilter, EntryKind};
pub use status::{StatusLine, status};

/// Resolve command-line paths to managed targets, in apply order.
///
/// No paths selects every target. With `recursive`, everything beneath a
/// named directory is selected too.
///
/// # Errors
///
/// Returns an error if a path is outside the destination directory or is
/// not managed.
pub fn select_targets(
    source: &SourceState,
    paths: &[AbsPath],
    recursive: bool,
) -> EngineResult<Vec<RelPath>> {
    let all = source.target_rel_paths();
    if paths.is_empty() {
        return Ok(all);
    }
    let mut wanted = BTreeSet::new();
    for path in paths {
        let rel = path
            .trim_dir_prefix(source.dest_dir())
            .ok_or_else(|| EngineError::NotInDestDir {
                path: path.to_string(),
                dest_dir: source.dest_dir().to_string(),
            })?;
        if source.entry(&rel).is_none() {
            return Err(EngineError::NotInSource(rel));
        }
        wanted.insert(rel);
    }
    Ok(all
        .into_iter()
        .filter(|rel| {
            wanted.contains(rel) || (recursive && wanted.iter().any(|w| rel.has_dir_prefix(w)))
        })
        .collect())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::test_helpers;
    use crate::system::test_helpers::MemSystem;

    fn fixture() -> SourceState {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_config/a", "a", 0o644)
                .with_file("/src/dot_config/b", "b", 0o644)
                .with_file("/src/dot_z", "z", 0o644),
        );
        test_helpers::read(&sys)
    }

    fn names(rels: &[RelPath]) -> Vec<&str> {
        rels.iter().map(RelPath::as_str).collect()
    }

    #[test]
    fn no_paths_selects_everything() {
        let source = fixture();
        let rels = select_targets(&source, &[], false).unwrap();
        assert_eq!(names(&rels), [".config", ".config/a", ".config/b", ".z"]);
    }

    #[test]
    fn directory_alone_or_recursive() {
        let source = fixture();
        let dir = [AbsPath::new("/home/.config").unwrap()];
        assert_eq!(
            names(&select_targets(&source, &dir, false).unwrap()),
            [".config"]
        );
        assert_eq!(
            names(&select_targets(&source, &dir, true).unwrap()),
            [".config", ".config/a", ".config/b"]
        );
    }

    #[test]
    fn unmanaged_and_outside_paths_are_errors() {
        let source = fixture();
        let err = select_targets(&source, &[AbsPath::new("/home/.nope").unwrap()], false)
            .unwrap_err();
        assert_eq!(err.to_string(), ".nope: not in source state");
        let err =
            select_targets(&source, &[AbsPath::new("/etc/x").unwrap()], false).unwrap_err();
        assert!(matches!(err, EngineError::NotInDestDir { .. }));
    }
}
