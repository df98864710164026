//! Include/exclude filtering of entries by kind.
use std::collections::BTreeSet;

use clap::ValueEnum;

use crate::attr::SourceFileKind;
use crate::source::SourceStateEntry;
use crate::target::TargetStateEntry;

/// Entry kinds selectable with `--include` and `--exclude`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum EntryKind {
    /// Directories.
    Dirs,
    /// Regular files, including `create_` and `modify_` targets.
    Files,
    /// Removals.
    Remove,
    /// Scripts.
    Scripts,
    /// Symbolic links.
    Symlinks,
}

/// Which entry kinds a command acts on. Exclusions win.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    include: BTreeSet<EntryKind>,
    exclude: BTreeSet<EntryKind>,
}

impl EntryFilter {
    /// A filter over `include` (empty means every kind) minus `exclude`.
    #[must_use]
    pub fn new(include: &[EntryKind], exclude: &[EntryKind]) -> Self {
        Self {
            include: include.iter().copied().collect(),
            exclude: exclude.iter().copied().collect(),
        }
    }

    /// Whether `kind` passes.
    #[must_use]
    pub fn includes(&self, kind: EntryKind) -> bool {
        !self.exclude.contains(&kind) && (self.include.is_empty() || self.include.contains(&kind))
    }

    /// Whether a source entry passes.
    #[must_use]
    pub fn includes_source(&self, entry: &SourceStateEntry) -> bool {
        self.includes(source_kind(entry))
    }

    /// Whether a computed target passes.
    #[must_use]
    pub fn includes_target(&self, target: &TargetStateEntry) -> bool {
        self.includes(target_kind(target))
    }
}

fn source_kind(entry: &SourceStateEntry) -> EntryKind {
    match entry {
        SourceStateEntry::Dir(_) => EntryKind::Dirs,
        SourceStateEntry::Remove(_) => EntryKind::Remove,
        SourceStateEntry::File(file) => match file.attr.kind {
            SourceFileKind::File | SourceFileKind::Create | SourceFileKind::Modify => {
                EntryKind::Files
            }
            SourceFileKind::Remove => EntryKind::Remove,
            SourceFileKind::Script => EntryKind::Scripts,
            SourceFileKind::Symlink => EntryKind::Symlinks,
        },
    }
}

const fn target_kind(target: &TargetStateEntry) -> EntryKind {
    match target {
        TargetStateEntry::Dir { .. } => EntryKind::Dirs,
        TargetStateEntry::File { .. } => EntryKind::Files,
        TargetStateEntry::Remove => EntryKind::Remove,
        TargetStateEntry::Script { .. } => EntryKind::Scripts,
        TargetStateEntry::Symlink { .. } => EntryKind::Symlinks,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_includes_everything() {
        let filter = EntryFilter::default();
        assert!(filter.includes(EntryKind::Dirs));
        assert!(filter.includes(EntryKind::Scripts));
    }

    #[test]
    fn include_narrows_and_exclude_wins() {
        let filter = EntryFilter::new(
            &[EntryKind::Files, EntryKind::Scripts],
            &[EntryKind::Scripts],
        );
        assert!(filter.includes(EntryKind::Files));
        assert!(!filter.includes(EntryKind::Scripts));
        assert!(!filter.includes(EntryKind::Dirs));
    }

    #[test]
    fn blank_symlink_target_still_counts_as_symlink() {
        let filter = EntryFilter::new(&[], &[EntryKind::Symlinks]);
        let target = TargetStateEntry::Symlink {
            linkname: String::new(),
        };
        assert!(!filter.includes_target(&target));
    }
}
