//! Converging the destination on the target state, one path at a time.
use std::fmt;

use crate::actual::ActualStateEntry;
use crate::entry_state::{EntryState, EntryStateKind, equivalent};
use crate::error::{EngineError, EngineResult, Flow};
use crate::path::{AbsPath, RelPath};
use crate::source::SourceState;
use crate::state::{self, PersistentState};
use crate::system::System;

use super::filter::{EntryFilter, EntryKind};

/// What the pre-apply callback is shown before a path is written.
#[derive(Debug)]
pub struct PreApply<'a> {
    /// Target-relative path.
    pub target_rel_path: &'a RelPath,
    /// The desired state.
    pub target: &'a EntryState,
    /// What was recorded after the last write, if anything.
    pub last_written: Option<&'a EntryState>,
    /// What is present now.
    pub actual: &'a EntryState,
}

/// Called before each path is converged. Returning
/// [`Flow::Skip`] leaves the path alone; [`Flow::Cancel`] stops the run.
pub type PreApplyFn<'a> = Box<dyn FnMut(&PreApply<'_>) -> EngineResult<()> + 'a>;

/// Settings shared by every path in one run.
pub struct ApplyOptions<'a> {
    /// Directory the target paths are relative to.
    pub target_dir: AbsPath,
    /// Entry kinds to act on.
    pub filter: EntryFilter,
    /// Consulted before each path.
    pub pre_apply: Option<PreApplyFn<'a>>,
}

impl fmt::Debug for ApplyOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyOptions")
            .field("target_dir", &self.target_dir)
            .field("filter", &self.filter)
            .field("pre_apply", &self.pre_apply.is_some())
            .finish()
    }
}

impl ApplyOptions<'_> {
    /// Options over `target_dir` with no filter and no callback.
    #[must_use]
    pub fn new(target_dir: AbsPath) -> Self {
        Self {
            target_dir,
            filter: EntryFilter::default(),
            pre_apply: None,
        }
    }
}

/// Per-run counters, reported once at the end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    /// Paths written.
    pub changed: u32,
    /// Paths already in the desired state.
    pub already_ok: u32,
    /// Paths skipped by a prompt or callback.
    pub skipped: u32,
    /// Paths that failed under keep-going.
    pub failed: u32,
}

impl ApplyStats {
    /// Format as `"N changed, M ok, K skipped, F failed"`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} changed, {} ok, {} skipped, {} failed",
            self.changed, self.already_ok, self.skipped, self.failed
        )
    }
}

/// The one-character status of moving from `from` to `to`:
/// `A`dded, `D`eleted, `M`odified, `R`un, or blank for no change.
#[must_use]
pub fn status_rune(from: Option<&EntryState>, to: &EntryState) -> char {
    let Some(from) = from else {
        return ' ';
    };
    if from.equal(to) {
        return ' ';
    }
    match to.kind {
        EntryStateKind::Remove => 'D',
        EntryStateKind::Dir | EntryStateKind::File | EntryStateKind::Symlink => {
            if from.kind == EntryStateKind::Remove {
                'A'
            } else {
                'M'
            }
        }
        EntryStateKind::Script => 'R',
    }
}

/// Converge one target path. Returns whether anything was written.
///
/// Unmanaged paths and paths rejected by the filter are left alone.
///
/// # Errors
///
/// Returns an error attributed to `rel` if the target cannot be computed
/// or written, or the callback's [`Flow`] sentinel.
pub fn apply_target(
    source: &SourceState,
    target_system: &dyn System,
    state: &mut dyn PersistentState,
    rel: &RelPath,
    options: &mut ApplyOptions<'_>,
) -> EngineResult<bool> {
    apply_one(source, target_system, state, rel, options).map_err(|e| e.at(rel))
}

fn apply_one(
    source: &SourceState,
    target_system: &dyn System,
    state: &mut dyn PersistentState,
    rel: &RelPath,
    options: &mut ApplyOptions<'_>,
) -> EngineResult<bool> {
    let Some(entry) = source.entry(rel) else {
        return Ok(false);
    };
    if !options.filter.includes_source(entry) {
        return Ok(false);
    }
    let target = entry.target(&source.target_context())?;
    if !options.filter.includes_target(target) {
        return Ok(false);
    }
    let path = options.target_dir.join(rel);
    if source.remove_dirs().contains(rel) {
        // Removed in post_apply once empty; never created.
        return Ok(false);
    }
    let target_state = target.entry_state();
    if target.skip_apply(state, &path)? {
        return Ok(false);
    }

    let actual = ActualStateEntry::read(target_system, &path)?;
    if let Some(pre_apply) = options.pre_apply.as_mut() {
        let actual_state = actual.entry_state();
        let mut last_written = state::get_entry_state(state, &path)?;
        if target_state.equal(&actual_state)
            && !equivalent(last_written.as_ref(), Some(&actual_state))
        {
            state::set_entry_state(state, &path, &target_state)?;
            last_written = Some(target_state.clone());
        }
        pre_apply(&PreApply {
            target_rel_path: rel,
            target: &target_state,
            last_written: last_written.as_ref(),
            actual: &actual_state,
        })?;
    }

    let changed = target.apply(target_system, state, &actual)?;
    if changed {
        state::set_entry_state(state, &path, &target_state)?;
    }
    Ok(changed)
}

/// Converge every path in `rels`, then remove emptied `remove_`
/// directories.
///
/// With `keep_going`, each failure is passed to `report`, counted in
/// [`ApplyStats::failed`], and the run continues.
///
/// # Errors
///
/// Returns the first failure without `keep_going`, or [`Flow::Cancel`] if
/// the callback cancelled.
pub fn apply_targets(
    source: &SourceState,
    target_system: &dyn System,
    state: &mut dyn PersistentState,
    rels: &[RelPath],
    options: &mut ApplyOptions<'_>,
    keep_going: bool,
    report: &mut dyn FnMut(&EngineError),
) -> EngineResult<ApplyStats> {
    let mut stats = ApplyStats::default();
    for rel in rels {
        match apply_target(source, target_system, state, rel, options) {
            Ok(true) => stats.changed += 1,
            Ok(false) => stats.already_ok += 1,
            Err(e) if e.flow() == Some(Flow::Skip) => stats.skipped += 1,
            Err(e) if e.flow().is_some() || !keep_going => return Err(e),
            Err(e) => {
                report(&e);
                stats.failed += 1;
            }
        }
    }
    match post_apply(source, target_system, state, rels, options, &mut stats) {
        Ok(()) => {}
        Err(e) if e.flow().is_some() || !keep_going => return Err(e),
        Err(e) => {
            report(&e);
            stats.failed += 1;
        }
    }
    Ok(stats)
}

/// Remove each `remove_` directory among `rels` that is now empty,
/// deepest first. Each removal goes through the pre-apply callback like
/// any other change.
///
/// # Errors
///
/// Returns an error if a `remove_` target exists but is not a directory,
/// or cannot be removed for a reason other than being non-empty, or the
/// callback's [`Flow::Cancel`].
pub fn post_apply(
    source: &SourceState,
    target_system: &dyn System,
    state: &mut dyn PersistentState,
    rels: &[RelPath],
    options: &mut ApplyOptions<'_>,
    stats: &mut ApplyStats,
) -> EngineResult<()> {
    if !options.filter.includes(EntryKind::Remove) {
        return Ok(());
    }
    let mut dirs: Vec<&RelPath> = rels
        .iter()
        .filter(|rel| source.remove_dirs().contains(*rel))
        .collect();
    dirs.sort_by(|a, b| b.cmp(a));
    for rel in dirs {
        match remove_empty_dir(target_system, state, rel, options) {
            Ok(true) => stats.changed += 1,
            Ok(false) => {}
            Err(e) if e.flow() == Some(Flow::Skip) => stats.skipped += 1,
            Err(e @ EngineError::Invalid { .. }) => return Err(e),
            Err(e) => return Err(e.at(rel)),
        }
    }
    Ok(())
}

fn remove_empty_dir(
    target_system: &dyn System,
    state: &mut dyn PersistentState,
    rel: &RelPath,
    options: &mut ApplyOptions<'_>,
) -> EngineResult<bool> {
    let path = options.target_dir.join(rel);
    match target_system.lstat(&path) {
        Ok(info) if info.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::Invalid {
                path: rel.clone(),
                message: "not a directory".to_string(),
            });
        }
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    if !target_system.read_dir(&path)?.is_empty() {
        return Ok(false);
    }

    let target_state = EntryState::remove();
    if let Some(pre_apply) = options.pre_apply.as_mut() {
        let actual_state = ActualStateEntry::read(target_system, &path)?.entry_state();
        let last_written = state::get_entry_state(state, &path)?;
        pre_apply(&PreApply {
            target_rel_path: rel,
            target: &target_state,
            last_written: last_written.as_ref(),
            actual: &actual_state,
        })?;
    }

    match target_system.remove(&path) {
        Ok(()) => {}
        Err(e) if e.is_dir_not_empty() || e.is_not_found() => return Ok(false),
        Err(e) => return Err(e.into()),
    }
    state::set_entry_state(state, &path, &target_state)?;
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::test_helpers;
    use crate::state::MemoryState;
    use crate::system::test_helpers::MemSystem;

    fn home() -> AbsPath {
        AbsPath::new("/home").unwrap()
    }

    fn apply_all(sys: &Arc<MemSystem>, state: &mut MemoryState) -> ApplyStats {
        let source = test_helpers::read(sys);
        let rels = source.target_rel_paths();
        apply_targets(
            &source,
            sys.as_ref(),
            state,
            &rels,
            &mut ApplyOptions::new(home()),
            false,
            &mut |_| {},
        )
        .unwrap()
    }

    // ------------------------------------------------------------------
    // status_rune
    // ------------------------------------------------------------------

    #[test]
    fn status_runes() {
        let file = EntryState::file(0o644, b"a");
        let other = EntryState::file(0o644, b"b");
        assert_eq!(status_rune(None, &file), ' ');
        assert_eq!(status_rune(Some(&file), &file), ' ');
        assert_eq!(status_rune(Some(&EntryState::remove()), &file), 'A');
        assert_eq!(status_rune(Some(&file), &other), 'M');
        assert_eq!(status_rune(Some(&file), &EntryState::remove()), 'D');
        assert_eq!(
            status_rune(Some(&EntryState::remove()), &EntryState::script(b"x")),
            'R'
        );
    }

    // ------------------------------------------------------------------
    // apply
    // ------------------------------------------------------------------

    #[test]
    fn apply_writes_and_records_state() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_bashrc", "export A=1\n", 0o644)
                .with_dir("/src/private_dot_ssh", 0o755)
                .with_dir("/home", 0o755),
        );
        let mut state = MemoryState::new();
        let stats = apply_all(&sys, &mut state);
        assert_eq!(stats.changed, 2);
        assert_eq!(sys.contents("/home/.bashrc").unwrap(), "export A=1\n");
        assert_eq!(sys.mode("/home/.ssh").unwrap() & 0o777, 0o700);

        let recorded =
            state::get_entry_state(&state, &AbsPath::new("/home/.bashrc").unwrap()).unwrap();
        assert!(recorded.unwrap().equal(&EntryState::file(0o644, b"export A=1\n")));
    }

    #[test]
    fn second_apply_changes_nothing() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a", "a\n", 0o644)
                .with_file("/src/dot_dir/file", "f\n", 0o644)
                .with_dir("/home", 0o755),
        );
        let mut state = MemoryState::new();
        apply_all(&sys, &mut state);
        let stats = apply_all(&sys, &mut state);
        assert_eq!(stats.changed, 0);
        assert_eq!(stats.already_ok, 3);
    }

    #[test]
    fn filter_excludes_kinds() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a", "a\n", 0o644)
                .with_file("/src/symlink_dot_link", "/target\n", 0o644)
                .with_dir("/home", 0o755),
        );
        let source = test_helpers::read(&sys);
        let mut options = ApplyOptions::new(home());
        options.filter = EntryFilter::new(&[], &[EntryKind::Files]);
        let mut state = MemoryState::new();
        for rel in source.target_rel_paths() {
            apply_target(&source, sys.as_ref(), &mut state, &rel, &mut options).unwrap();
        }
        assert!(!sys.exists("/home/.a"));
        assert!(sys.exists("/home/.link"));
    }

    #[test]
    fn pre_apply_sees_last_written_and_can_skip() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a", "new\n", 0o644)
                .with_file("/home/.a", "edited\n", 0o644),
        );
        let source = test_helpers::read(&sys);
        let mut state = MemoryState::new();
        let path = AbsPath::new("/home/.a").unwrap();
        state::set_entry_state(&mut state, &path, &EntryState::file(0o644, b"old\n")).unwrap();

        let mut seen = Vec::new();
        let mut options = ApplyOptions::new(home());
        options.pre_apply = Some(Box::new(|info: &PreApply<'_>| {
            seen.push((
                info.target_rel_path.to_string(),
                info.last_written.is_some(),
                info.actual.equal(info.target),
            ));
            Err(EngineError::Flow(Flow::Skip))
        }));
        let err = apply_target(&source, sys.as_ref(), &mut state, &RelPath::new(".a"), &mut options)
            .unwrap_err();
        drop(options);
        assert_eq!(err.flow(), Some(Flow::Skip));
        assert_eq!(seen, [(".a".to_string(), true, false)]);
        assert_eq!(sys.contents("/home/.a").unwrap(), "edited\n");
    }

    #[test]
    fn matching_destination_refreshes_stale_history() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a", "same\n", 0o644)
                .with_file("/home/.a", "same\n", 0o644),
        );
        let source = test_helpers::read(&sys);
        let mut state = MemoryState::new();
        let path = AbsPath::new("/home/.a").unwrap();
        state::set_entry_state(&mut state, &path, &EntryState::file(0o644, b"old\n")).unwrap();

        let mut options = ApplyOptions::new(home());
        options.pre_apply = Some(Box::new(|_: &PreApply<'_>| Ok(())));
        let changed =
            apply_target(&source, sys.as_ref(), &mut state, &RelPath::new(".a"), &mut options)
                .unwrap();
        assert!(!changed);
        let recorded = state::get_entry_state(&state, &path).unwrap().unwrap();
        assert!(recorded.equal(&EntryState::file(0o644, b"same\n")));
    }

    #[test]
    fn keep_going_counts_failures() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_bad.tmpl", "{{ missing }}", 0o644)
                .with_file("/src/dot_good", "ok\n", 0o644)
                .with_dir("/home", 0o755),
        );
        let source = test_helpers::read(&sys);
        let rels = source.target_rel_paths();
        let mut state = MemoryState::new();
        let mut reported = Vec::new();
        let stats = apply_targets(
            &source,
            sys.as_ref(),
            &mut state,
            &rels,
            &mut ApplyOptions::new(home()),
            true,
            &mut |e| reported.push(e.to_string()),
        )
        .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.summary(), "1 changed, 0 ok, 0 skipped, 1 failed");
        assert_eq!(reported.len(), 1);
        assert!(reported[0].starts_with(".bad: "));
        assert_eq!(sys.contents("/home/.good").unwrap(), "ok\n");
    }

    #[test]
    fn without_keep_going_the_first_error_stops_the_run() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a.tmpl", "{{ missing }}", 0o644)
                .with_file("/src/dot_b", "b\n", 0o644)
                .with_dir("/home", 0o755),
        );
        let source = test_helpers::read(&sys);
        let rels = source.target_rel_paths();
        let err = apply_targets(
            &source,
            sys.as_ref(),
            &mut MemoryState::new(),
            &rels,
            &mut ApplyOptions::new(home()),
            false,
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.to_string().starts_with(".a: "));
        assert!(!sys.exists("/home/.b"));
    }

    // ------------------------------------------------------------------
    // remove_ directories
    // ------------------------------------------------------------------

    #[test]
    fn remove_dir_is_deleted_once_empty() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src/remove_dot_old", 0o755)
                .with_dir("/home/.old", 0o755),
        );
        let mut state = MemoryState::new();
        apply_all(&sys, &mut state);
        assert!(!sys.exists("/home/.old"));
    }

    #[test]
    fn remove_dir_with_contents_is_kept() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src/remove_dot_old", 0o755)
                .with_file("/home/.old/keep", "x", 0o644),
        );
        let mut state = MemoryState::new();
        apply_all(&sys, &mut state);
        assert!(sys.exists("/home/.old/keep"));
    }

    #[test]
    fn remove_dir_goes_through_pre_apply() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src/remove_dot_old", 0o755)
                .with_dir("/home/.old", 0o755),
        );
        let source = test_helpers::read(&sys);
        let rels = source.target_rel_paths();
        let mut seen = Vec::new();
        let mut options = ApplyOptions::new(home());
        options.pre_apply = Some(Box::new(|info: &PreApply<'_>| {
            seen.push((info.target_rel_path.to_string(), info.target.kind));
            Err(EngineError::Flow(Flow::Skip))
        }));
        let stats = apply_targets(
            &source,
            sys.as_ref(),
            &mut MemoryState::new(),
            &rels,
            &mut options,
            false,
            &mut |_| {},
        )
        .unwrap();
        drop(options);
        assert_eq!(seen, [(".old".to_string(), EntryStateKind::Remove)]);
        assert_eq!(stats.skipped, 1);
        assert!(sys.exists("/home/.old"));
    }

    #[test]
    fn absent_remove_dir_is_not_created() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src/remove_dot_old", 0o755)
                .with_dir("/home", 0o755),
        );
        let mut state = MemoryState::new();
        apply_all(&sys, &mut state);
        assert!(!sys.exists("/home/.old"));
    }
}
