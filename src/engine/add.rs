//! Bringing destination entries under management.
//!
//! New source entries are built from what is observed in the destination,
//! then written into the source directory with the same converge step that
//! `apply` uses, so the source directory is just another target.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::actual::ActualStateEntry;
use crate::attr::{DirAttr, FileAttr, SourceFileKind};
use crate::entry_state::EntryState;
use crate::error::{EngineError, EngineResult, Flow};
use crate::path::{AbsPath, RelPath, SourceRelPath};
use crate::source::{KEEP_NAME, SourceState, SourceStateEntry};
use crate::state::{self, NullState, PersistentState};
use crate::system::{FileInfo, FileKind, System, SystemError};
use crate::target::TargetStateEntry;
use crate::template::autotemplate;

use super::filter::{EntryFilter, EntryKind};

/// What the pre-add callback is shown before an entry is written.
#[derive(Debug)]
pub struct PreAdd<'a> {
    /// Target-relative path.
    pub target_rel_path: &'a RelPath,
    /// The source path about to be written.
    pub new_source: &'a SourceRelPath,
    /// The source path currently managing the target, if different.
    pub old_source: Option<&'a SourceRelPath>,
    /// Attributes the existing entry has and the new one does not.
    pub lost: Vec<&'static str>,
}

/// Called before each entry is written. Returning [`Flow::Skip`] leaves
/// the source untouched for that path.
pub type PreAddFn<'a> = Box<dyn FnMut(&PreAdd<'_>) -> EngineResult<()> + 'a>;

/// How new source entries are built.
#[derive(Default)]
pub struct AddOptions<'a> {
    /// Add files as `create_`.
    pub create: bool,
    /// Encrypt file contents.
    pub encrypt: bool,
    /// Mark directories `exact_`.
    pub exact: bool,
    /// Mark files as templates; symlinks to the source or home directory
    /// are rewritten as template expressions.
    pub template: bool,
    /// Replace template data values found in files with references.
    pub autotemplate: bool,
    /// Entry kinds to add.
    pub filter: EntryFilter,
    /// Paths that may never be added, nor anything beneath them.
    pub protected: Vec<AbsPath>,
    /// Consulted before each entry is written.
    pub pre_add: Option<PreAddFn<'a>>,
}

impl fmt::Debug for AddOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddOptions")
            .field("create", &self.create)
            .field("encrypt", &self.encrypt)
            .field("exact", &self.exact)
            .field("template", &self.template)
            .field("autotemplate", &self.autotemplate)
            .field("filter", &self.filter)
            .field("protected", &self.protected)
            .finish_non_exhaustive()
    }
}

struct Update {
    dest: Option<AbsPath>,
    entry_state: EntryState,
    source_rels: Vec<RelPath>,
}

enum NewAttr {
    Dir(DirAttr),
    File(FileAttr),
}

struct NewEntry {
    source_rel_path: SourceRelPath,
    attr: NewAttr,
    target: TargetStateEntry,
}

impl NewEntry {
    const fn is_dir(&self) -> bool {
        matches!(self.attr, NewAttr::Dir(_))
    }
}

/// Add every path in `infos` to the source state.
///
/// `infos` maps destination paths to their observed metadata, as collected
/// by [`SourceState::add_dest_abs_path_info`]. Returns the target paths
/// that were written.
///
/// # Errors
///
/// Returns an error if a path is protected, its parent directory is not
/// managed, or a read or write fails.
pub fn add(
    source: &SourceState,
    source_system: &dyn System,
    state: &mut dyn PersistentState,
    dest_system: &dyn System,
    infos: &BTreeMap<AbsPath, FileInfo>,
    options: &mut AddOptions<'_>,
) -> EngineResult<Vec<RelPath>> {
    let dest_dir = source.dest_dir();
    let mut candidates = Vec::new();
    for (path, info) in infos {
        if !options.filter.includes(info_kind(info)) {
            continue;
        }
        let Some(rel) = path.trim_dir_prefix(dest_dir) else {
            return Err(EngineError::NotInDestDir {
                path: path.to_string(),
                dest_dir: dest_dir.to_string(),
            });
        };
        if source.ignored(&rel) {
            tracing::warn!("{rel}: ignored");
            continue;
        }
        if let Some(protected) = options
            .protected
            .iter()
            .find(|p| path.trim_dir_prefix(p).is_some())
        {
            return Err(EngineError::Protected(format!("{path} ({protected})")));
        }
        candidates.push((path, rel, info));
    }

    let mut updates: Vec<Update> = Vec::new();
    let mut new_entries: BTreeMap<RelPath, TargetStateEntry> = BTreeMap::new();
    let mut new_by_target: BTreeMap<RelPath, SourceRelPath> = BTreeMap::new();
    let mut new_dirs: BTreeSet<SourceRelPath> = BTreeSet::new();
    let mut non_empty_dirs: BTreeSet<SourceRelPath> = BTreeSet::new();
    let mut dir_renames: BTreeMap<AbsPath, AbsPath> = BTreeMap::new();
    let mut added = Vec::new();

    for (path, rel, info) in candidates {
        if let Some(external) = external_ancestor(source, &rel) {
            tracing::warn!("{external}: skipping entries in external_ directory");
            continue;
        }
        let parent_rel = rel.parent();
        let parent = if parent_rel.is_empty() {
            SourceRelPath::dir(RelPath::default())
        } else if let Some(parent) = new_by_target.get(&parent_rel) {
            parent.clone()
        } else if let Some(SourceStateEntry::Dir(dir)) = source.entry(&parent_rel) {
            dir.source_rel_path.clone()
        } else {
            return Err(EngineError::ParentNotInSource(rel));
        };
        non_empty_dirs.insert(parent.clone());

        let actual = observe(dest_system, path, info)?;
        let new = new_entry(source, source_system, &actual, &rel, &parent, options)?;
        let old = source.entry(&rel).filter(|old| {
            matches!(old, SourceStateEntry::Dir(_) | SourceStateEntry::File(_))
                && *old.source_rel_path() != new.source_rel_path
        });

        if let Some(pre_add) = options.pre_add.as_mut() {
            let lost = source
                .entry(&rel)
                .map(|old| lost_attrs(old, &new.attr))
                .unwrap_or_default();
            match pre_add(&PreAdd {
                target_rel_path: &rel,
                new_source: &new.source_rel_path,
                old_source: old.map(SourceStateEntry::source_rel_path),
                lost,
            }) {
                Ok(()) => {}
                Err(e) if e.flow() == Some(Flow::Skip) => continue,
                Err(e) => return Err(e.at(&rel)),
            }
        }

        let mut update = Update {
            dest: Some(path.clone()),
            entry_state: actual.entry_state(),
            source_rels: vec![new.source_rel_path.rel_path().clone()],
        };
        if let Some(old) = old {
            let old_rel = old.source_rel_path().rel_path().clone();
            if new.is_dir() && matches!(old, SourceStateEntry::Dir(_)) {
                dir_renames.insert(
                    source.source_dir().join(&old_rel),
                    source.source_dir().join(new.source_rel_path.rel_path()),
                );
                continue;
            }
            new_entries.insert(old_rel.clone(), TargetStateEntry::Remove);
            update.source_rels.push(old_rel);
        }

        if new.is_dir() && source.entry(&rel).is_none() {
            new_dirs.insert(new.source_rel_path.clone());
        }
        new_by_target.insert(rel.clone(), new.source_rel_path.clone());
        new_entries.insert(new.source_rel_path.rel_path().clone(), new.target);
        updates.push(update);
        added.push(rel);
    }

    let keep_perm = 0o666 & !source.umask();
    for dir in new_dirs.difference(&non_empty_dirs) {
        let keep = dir.rel_path().join_str(KEEP_NAME);
        new_entries.insert(
            keep.clone(),
            TargetStateEntry::File {
                contents: Vec::new(),
                perm: keep_perm,
                empty: true,
                overwrite: false,
            },
        );
        updates.push(Update {
            dest: None,
            entry_state: EntryState::file(keep_perm, b""),
            source_rels: vec![keep],
        });
    }

    let mut null = NullState;
    for update in &updates {
        for source_rel in &update.source_rels {
            let Some(target) = new_entries.get(source_rel) else {
                continue;
            };
            let path = source.source_dir().join(source_rel);
            let actual = ActualStateEntry::read(source_system, &path)?;
            target.apply(source_system, &mut null, &actual)?;
        }
        if let Some(dest) = &update.dest {
            state::set_entry_state(state, dest, &update.entry_state)?;
        }
    }

    for (old, new) in dir_renames.iter().rev() {
        source_system.rename(old, new)?;
    }
    Ok(added)
}

const fn info_kind(info: &FileInfo) -> EntryKind {
    match info.kind {
        FileKind::Dir => EntryKind::Dirs,
        FileKind::Symlink => EntryKind::Symlinks,
        FileKind::File | FileKind::Other => EntryKind::Files,
    }
}

fn external_ancestor(source: &SourceState, rel: &RelPath) -> Option<RelPath> {
    rel.ancestors().into_iter().find(|ancestor| {
        matches!(source.entry(ancestor), Some(SourceStateEntry::Dir(d)) if d.attr.external)
    })
}

/// Read `path` as `info` describes it, so that `--follow` sees the
/// symlink's target rather than the link.
fn observe(system: &dyn System, path: &AbsPath, info: &FileInfo) -> EngineResult<ActualStateEntry> {
    Ok(match info.kind {
        FileKind::Dir => ActualStateEntry::Dir {
            path: path.clone(),
            perm: info.mode & 0o7777,
        },
        FileKind::File => ActualStateEntry::File {
            path: path.clone(),
            perm: info.mode & 0o7777,
            contents: system.read_file(path)?,
        },
        FileKind::Symlink => ActualStateEntry::Symlink {
            path: path.clone(),
            linkname: system.readlink(path)?,
        },
        FileKind::Other => {
            return Err(EngineError::UnsupportedFileType {
                path: path.to_string(),
            });
        }
    })
}

fn new_entry(
    source: &SourceState,
    source_system: &dyn System,
    actual: &ActualStateEntry,
    rel: &RelPath,
    parent: &SourceRelPath,
    options: &AddOptions<'_>,
) -> EngineResult<NewEntry> {
    let name = rel.base();
    let umask = source.umask();
    let suffix = source.encryption().encrypted_suffix();
    match actual {
        ActualStateEntry::Dir { perm, .. } => {
            let attr = DirAttr::from_mode(name, *perm, options.exact);
            Ok(NewEntry {
                source_rel_path: parent.join(&SourceRelPath::dir(RelPath::new(&attr.encode()))),
                attr: NewAttr::Dir(attr),
                target: TargetStateEntry::Dir {
                    perm: 0o777 & !umask,
                },
            })
        }
        ActualStateEntry::File { perm, contents, .. } => {
            let mut attr = FileAttr::from_mode(name, *perm);
            attr.template = options.template;
            if options.create {
                attr.kind = SourceFileKind::Create;
            }
            let mut contents = contents.clone();
            if options.autotemplate {
                let text = String::from_utf8_lossy(&contents).into_owned();
                let (templated, replaced) = autotemplate(&text, source.templates().data());
                if replaced {
                    attr.template = true;
                    contents = templated.into_bytes();
                }
            }
            if attr.template && std::str::from_utf8(&contents).is_err() {
                tracing::warn!("{rel}: invalid UTF-8");
            }
            attr.empty = contents.is_empty();
            if options.encrypt {
                attr.encrypted = true;
                contents = source.encryption().encrypt(source_system, &contents)?;
            }
            Ok(NewEntry {
                source_rel_path: parent
                    .join(&SourceRelPath::file(RelPath::new(&attr.encode(suffix)))),
                attr: NewAttr::File(attr),
                target: TargetStateEntry::File {
                    contents,
                    empty: true,
                    perm: 0o666 & !umask,
                    overwrite: false,
                },
            })
        }
        ActualStateEntry::Symlink { linkname, .. } => {
            let mut contents = linkname.clone();
            let mut template = false;
            if options.autotemplate {
                let (templated, replaced) = autotemplate(linkname, source.templates().data());
                contents = templated;
                template = replaced;
            } else if options.template {
                template = true;
                if let Some(rest) = strip_dir(linkname, source.source_dir()) {
                    contents = format!("{{{{ chezmoi.sourceDir }}}}/{rest}");
                } else if let Some(rest) = strip_dir(linkname, source.home_dir()) {
                    contents = format!("{{{{ chezmoi.homeDir }}}}/{rest}");
                }
            }
            contents.push('\n');
            let attr = FileAttr {
                target_name: name.to_string(),
                kind: SourceFileKind::Symlink,
                template,
                ..FileAttr::default()
            };
            Ok(NewEntry {
                source_rel_path: parent
                    .join(&SourceRelPath::file(RelPath::new(&attr.encode(suffix)))),
                attr: NewAttr::File(attr),
                target: TargetStateEntry::File {
                    contents: contents.into_bytes(),
                    perm: 0o666 & !umask,
                    empty: true,
                    overwrite: false,
                },
            })
        }
        ActualStateEntry::Absent { path } => {
            Err(SystemError::not_found("lstat", path).into())
        }
    }
}

fn strip_dir<'a>(linkname: &'a str, dir: &AbsPath) -> Option<&'a str> {
    linkname
        .strip_prefix(dir.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Attributes the old entry has that `new` would drop.
fn lost_attrs(old: &SourceStateEntry, new: &NewAttr) -> Vec<&'static str> {
    let lost: Vec<(&'static str, bool)> = match (old, new) {
        (SourceStateEntry::Dir(old), NewAttr::Dir(new)) => vec![
            ("exact", old.attr.exact && !new.exact),
            ("private", old.attr.private && !new.private),
            ("readonly", old.attr.read_only && !new.read_only),
        ],
        (SourceStateEntry::File(old), NewAttr::File(new)) => vec![
            ("encrypted", old.attr.encrypted && !new.encrypted),
            ("executable", old.attr.executable && !new.executable),
            ("private", old.attr.private && !new.private),
            ("readonly", old.attr.read_only && !new.read_only),
            ("template", old.attr.template && !new.template),
        ],
        _ => Vec::new(),
    };
    lost.into_iter()
        .filter_map(|(label, lost)| lost.then_some(label))
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::test_helpers;
    use crate::state::MemoryState;
    use crate::system::test_helpers::MemSystem;

    fn abs(p: &str) -> AbsPath {
        AbsPath::new(p).unwrap()
    }

    fn run_add(
        sys: &Arc<MemSystem>,
        paths: &[&str],
        options: &mut AddOptions<'_>,
    ) -> EngineResult<Vec<RelPath>> {
        let source = test_helpers::read(sys);
        let mut infos = BTreeMap::new();
        for path in paths {
            source.add_dest_abs_path_info(&mut infos, sys.as_ref(), &abs(path), None)?;
        }
        let mut state = MemoryState::new();
        add(
            &source,
            sys.as_ref(),
            &mut state,
            sys.as_ref(),
            &infos,
            options,
        )
    }

    fn source_paths(sys: &MemSystem) -> Vec<String> {
        sys.paths()
            .into_iter()
            .filter(|p| p.starts_with("/src/"))
            .collect()
    }

    // ------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------

    #[test]
    fn file_in_new_dir_adds_both_without_keep() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.dir/file", "contents\n", 0o644),
        );
        let added = run_add(&sys, &["/home/.dir/file"], &mut AddOptions::default()).unwrap();
        assert_eq!(added, [RelPath::new(".dir"), RelPath::new(".dir/file")]);
        assert_eq!(source_paths(&sys), ["/src/dot_dir", "/src/dot_dir/file"]);
        assert_eq!(sys.contents("/src/dot_dir/file").unwrap(), "contents\n");
    }

    #[test]
    fn empty_dir_gets_keep_file() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_dir("/home/.dir", 0o755),
        );
        run_add(&sys, &["/home/.dir"], &mut AddOptions::default()).unwrap();
        assert_eq!(source_paths(&sys), ["/src/dot_dir", "/src/dot_dir/.keep"]);
        assert_eq!(sys.contents("/src/dot_dir/.keep").unwrap(), "");
    }

    #[test]
    fn exact_and_private_dir_names() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_dir("/home/.ssh", 0o700),
        );
        let mut options = AddOptions {
            exact: true,
            ..AddOptions::default()
        };
        run_add(&sys, &["/home/.ssh"], &mut options).unwrap();
        assert!(sys.exists("/src/exact_private_dot_ssh"));
    }

    #[test]
    fn parent_must_be_managed() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.config/app/rc", "x", 0o644),
        );
        let source = test_helpers::read(&sys);
        let mut infos = BTreeMap::new();
        infos.insert(
            abs("/home/.config/app/rc"),
            sys.lstat(&abs("/home/.config/app/rc")).unwrap(),
        );
        let err = add(
            &source,
            sys.as_ref(),
            &mut MemoryState::new(),
            sys.as_ref(),
            &infos,
            &mut AddOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            ".config/app/rc: parent directory not in source state"
        );
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    #[test]
    fn file_attributes_follow_mode() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.run", "#!/bin/sh\n", 0o755)
                .with_file("/home/.secret", "s\n", 0o600)
                .with_file("/home/.empty", "", 0o644),
        );
        run_add(
            &sys,
            &["/home/.run", "/home/.secret", "/home/.empty"],
            &mut AddOptions::default(),
        )
        .unwrap();
        assert_eq!(
            source_paths(&sys),
            [
                "/src/empty_dot_empty",
                "/src/executable_dot_run",
                "/src/private_dot_secret"
            ]
        );
    }

    #[test]
    fn create_template_and_encrypt_flags() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.a", "a\n", 0o644)
                .with_file("/home/.b", "b\n", 0o644),
        );
        let mut options = AddOptions {
            create: true,
            template: true,
            ..AddOptions::default()
        };
        run_add(&sys, &["/home/.a"], &mut options).unwrap();
        assert_eq!(sys.contents("/src/create_dot_a.tmpl").unwrap(), "a\n");

        let mut options = AddOptions {
            encrypt: true,
            ..AddOptions::default()
        };
        run_add(&sys, &["/home/.b"], &mut options).unwrap();
        let ciphertext = sys.contents("/src/encrypted_dot_b.xor").unwrap();
        assert_ne!(ciphertext, "b\n");
    }

    #[test]
    fn autotemplate_replaces_data_values() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/.chezmoidata.toml", "email = \"me@example.com\"\n", 0o644)
                .with_file("/home/.gitconfig", "email = me@example.com\n", 0o644),
        );
        let mut options = AddOptions {
            autotemplate: true,
            ..AddOptions::default()
        };
        run_add(&sys, &["/home/.gitconfig"], &mut options).unwrap();
        assert_eq!(
            sys.contents("/src/dot_gitconfig.tmpl").unwrap(),
            "email = {{ email }}\n"
        );
    }

    #[test]
    fn readding_with_new_name_replaces_old_file() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_a", "old\n", 0o644)
                .with_file("/home/.a", "new\n", 0o755),
        );
        run_add(&sys, &["/home/.a"], &mut AddOptions::default()).unwrap();
        assert_eq!(source_paths(&sys), ["/src/executable_dot_a"]);
    }

    // ------------------------------------------------------------------
    // Symlinks
    // ------------------------------------------------------------------

    #[test]
    fn symlink_target_becomes_contents() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_symlink("/home/.link", "/etc/target"),
        );
        run_add(&sys, &["/home/.link"], &mut AddOptions::default()).unwrap();
        assert_eq!(sys.contents("/src/symlink_dot_link").unwrap(), "/etc/target\n");
    }

    #[test]
    fn templated_symlink_into_home() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_symlink("/home/.link", "/home/dotfiles/rc"),
        );
        let mut options = AddOptions {
            template: true,
            ..AddOptions::default()
        };
        run_add(&sys, &["/home/.link"], &mut options).unwrap();
        assert_eq!(
            sys.contents("/src/symlink_dot_link.tmpl").unwrap(),
            "{{ chezmoi.homeDir }}/dotfiles/rc\n"
        );
    }

    // ------------------------------------------------------------------
    // Guards and callbacks
    // ------------------------------------------------------------------

    #[test]
    fn protected_paths_are_rejected() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.config/dotstate/dotstate.toml", "", 0o644)
                .with_dir("/src/dot_config", 0o755),
        );
        let mut options = AddOptions {
            protected: vec![abs("/home/.config/dotstate")],
            ..AddOptions::default()
        };
        let err = run_add(&sys, &["/home/.config/dotstate/dotstate.toml"], &mut options)
            .unwrap_err();
        assert!(matches!(err, EngineError::Protected(_)));
    }

    #[test]
    fn ignored_paths_are_skipped() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/.chezmoiignore", ".cache\n", 0o644)
                .with_file("/home/.cache", "x", 0o644),
        );
        let added = run_add(&sys, &["/home/.cache"], &mut AddOptions::default()).unwrap();
        assert!(added.is_empty());
        assert!(!sys.exists("/src/dot_cache"));
    }

    #[test]
    fn pre_add_reports_lost_attributes_and_can_skip() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/private_dot_netrc", "old\n", 0o600)
                .with_file("/home/.netrc", "new\n", 0o644),
        );
        let mut seen = Vec::new();
        let mut options = AddOptions {
            pre_add: Some(Box::new(|info: &PreAdd<'_>| {
                seen.push((info.old_source.map(ToString::to_string), info.lost.clone()));
                Err(EngineError::Flow(Flow::Skip))
            })),
            ..AddOptions::default()
        };
        let added = run_add(&sys, &["/home/.netrc"], &mut options).unwrap();
        drop(options);
        assert!(added.is_empty());
        assert_eq!(
            seen,
            [(Some("private_dot_netrc".to_string()), vec!["private"])]
        );
        assert_eq!(sys.contents("/src/private_dot_netrc").unwrap(), "old\n");
    }

    #[test]
    fn destination_state_is_recorded() {
        let sys = Arc::new(
            MemSystem::new()
                .with_dir("/src", 0o755)
                .with_file("/home/.a", "a\n", 0o644),
        );
        let source = test_helpers::read(&sys);
        let mut infos = BTreeMap::new();
        source
            .add_dest_abs_path_info(&mut infos, sys.as_ref(), &abs("/home/.a"), None)
            .unwrap();
        let mut state = MemoryState::new();
        add(
            &source,
            sys.as_ref(),
            &mut state,
            sys.as_ref(),
            &infos,
            &mut AddOptions::default(),
        )
        .unwrap();
        let recorded = state::get_entry_state(&state, &abs("/home/.a")).unwrap().unwrap();
        assert!(recorded.equal(&EntryState::file(0o644, b"a\n")));
    }
}
