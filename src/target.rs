//! Desired destination entries and how to converge on them.
use crate::actual::ActualStateEntry;
use crate::attr::{ScriptCondition, ScriptOrder};
use crate::entry_state::{EntryState, sha256_hex};
use crate::error::EngineError;
use crate::path::RelPath;
use crate::state::{self, PersistentState, SCRIPT_STATE_BUCKET, ScriptState};
use crate::system::{ScriptRun, System};

/// The computed state of one target path.
///
/// Permissions are final: the umask has already been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStateEntry {
    /// A directory.
    Dir {
        /// Permission bits.
        perm: u32,
    },
    /// A regular file.
    File {
        /// Contents.
        contents: Vec<u8>,
        /// Permission bits.
        perm: u32,
        /// Keep the file even when the contents are whitespace-only.
        empty: bool,
        /// Never prompt on external changes.
        overwrite: bool,
    },
    /// Absent.
    Remove,
    /// A script to run.
    Script {
        /// Target-relative name.
        name: RelPath,
        /// Contents.
        contents: Vec<u8>,
        /// Run condition.
        condition: ScriptCondition,
        /// Run order.
        order: ScriptOrder,
    },
    /// A symbolic link.
    Symlink {
        /// Link target; empty means remove.
        linkname: String,
    },
}

/// Whether `contents` has nothing but whitespace.
#[must_use]
pub fn is_blank(contents: &[u8]) -> bool {
    contents.iter().all(u8::is_ascii_whitespace)
}

impl TargetStateEntry {
    /// Fingerprint of the desired state.
    #[must_use]
    pub fn entry_state(&self) -> EntryState {
        match self {
            Self::Dir { perm } => EntryState::dir(*perm),
            Self::File {
                contents,
                perm,
                empty,
                overwrite,
            } => {
                if !*empty && is_blank(contents) {
                    return EntryState::remove();
                }
                let mut state = EntryState::file(*perm, contents);
                state.overwrite = *overwrite;
                state
            }
            Self::Remove => EntryState::remove(),
            Self::Script { contents, .. } => EntryState::script(contents),
            Self::Symlink { linkname } if linkname.is_empty() => EntryState::remove(),
            Self::Symlink { linkname } => EntryState::symlink(linkname),
        }
    }

    /// Whether this is a script.
    #[must_use]
    pub const fn is_script(&self) -> bool {
        matches!(self, Self::Script { .. })
    }

    /// Script run order; non-scripts run during the file phase.
    #[must_use]
    pub const fn order(&self) -> ScriptOrder {
        match self {
            Self::Script { order, .. } => *order,
            _ => ScriptOrder::During,
        }
    }

    /// Whether a script should not run this time.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent state cannot be read.
    pub fn skip_apply(
        &self,
        state: &dyn PersistentState,
        target: &crate::path::AbsPath,
    ) -> Result<bool, EngineError> {
        let Self::Script {
            contents,
            condition,
            ..
        } = self
        else {
            return Ok(false);
        };
        if contents.is_empty() {
            return Ok(true);
        }
        let sha = sha256_hex(contents);
        match condition {
            ScriptCondition::Always => Ok(false),
            ScriptCondition::Once => Ok(state.get(SCRIPT_STATE_BUCKET, &sha)?.is_some()),
            ScriptCondition::OnChange => Ok(state::get_entry_state(state, target)?
                .is_some_and(|last| last.contents_sha256.as_deref() == Some(sha.as_str()))),
        }
    }

    /// Converge `actual` on this state. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a system operation fails or a script fails.
    pub fn apply(
        &self,
        system: &dyn System,
        state: &mut dyn PersistentState,
        actual: &ActualStateEntry,
    ) -> Result<bool, EngineError> {
        let path = actual.path();
        match self {
            Self::Dir { perm } => {
                if let ActualStateEntry::Dir { perm: actual_perm, .. } = actual {
                    if actual_perm == perm {
                        return Ok(false);
                    }
                    system.chmod(path, *perm)?;
                    return Ok(true);
                }
                actual.remove(system)?;
                system.mkdir(path, *perm)?;
                Ok(true)
            }
            Self::File {
                contents,
                perm,
                empty,
                ..
            } => {
                if !*empty && is_blank(contents) {
                    if actual.is_absent() {
                        return Ok(false);
                    }
                    system.remove_all(path)?;
                    return Ok(true);
                }
                if let ActualStateEntry::File {
                    perm: actual_perm,
                    contents: actual_contents,
                    ..
                } = actual
                {
                    if sha256_hex(actual_contents) == sha256_hex(contents) {
                        if actual_perm == perm {
                            return Ok(false);
                        }
                        system.chmod(path, *perm)?;
                        return Ok(true);
                    }
                } else {
                    actual.remove(system)?;
                }
                system.write_file(path, contents, *perm)?;
                Ok(true)
            }
            Self::Remove => {
                if actual.is_absent() {
                    return Ok(false);
                }
                system.remove_all(path)?;
                Ok(true)
            }
            Self::Symlink { linkname } => {
                if linkname.is_empty() {
                    if actual.is_absent() {
                        return Ok(false);
                    }
                    system.remove_all(path)?;
                    return Ok(true);
                }
                if let ActualStateEntry::Symlink {
                    linkname: actual_linkname,
                    ..
                } = actual
                {
                    if actual_linkname == linkname {
                        return Ok(false);
                    }
                }
                actual.remove(system)?;
                system.write_symlink(linkname, path)?;
                Ok(true)
            }
            Self::Script { name, contents, .. } => {
                if self.skip_apply(state, path)? {
                    return Ok(false);
                }
                let run_at = chrono::Utc::now();
                if !is_blank(contents) {
                    system.run_script(&ScriptRun {
                        name,
                        dir: &path.parent(),
                        contents,
                    })?;
                }
                let record = ScriptState {
                    name: name.to_string(),
                    run_at,
                };
                state::set_script_state(state, &sha256_hex(contents), &record)?;
                state::set_entry_state(state, path, &EntryState::script(contents))?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::path::AbsPath;
    use crate::state::MemoryState;
    use crate::system::test_helpers::MemSystem;

    fn p(s: &str) -> AbsPath {
        AbsPath::new(s).unwrap()
    }

    fn apply(target: &TargetStateEntry, sys: &MemSystem, state: &mut MemoryState, path: &str) -> bool {
        let actual = ActualStateEntry::read(sys, &p(path)).unwrap();
        target.apply(sys, state, &actual).unwrap()
    }

    fn file(contents: &str, perm: u32) -> TargetStateEntry {
        TargetStateEntry::File {
            contents: contents.as_bytes().to_vec(),
            perm,
            empty: false,
            overwrite: false,
        }
    }

    fn script(contents: &str, condition: ScriptCondition) -> TargetStateEntry {
        TargetStateEntry::Script {
            name: RelPath::new("setup.sh"),
            contents: contents.as_bytes().to_vec(),
            condition,
            order: ScriptOrder::During,
        }
    }

    // ------------------------------------------------------------------
    // files and directories
    // ------------------------------------------------------------------

    #[test]
    fn file_write_is_idempotent() {
        let sys = MemSystem::new().with_dir("/h", 0o755);
        let mut state = MemoryState::new();
        let target = file("hello\n", 0o644);
        assert!(apply(&target, &sys, &mut state, "/h/f"));
        assert_eq!(sys.contents("/h/f").as_deref(), Some("hello\n"));
        assert!(!apply(&target, &sys, &mut state, "/h/f"));
    }

    #[test]
    fn same_contents_only_chmods() {
        let sys = MemSystem::new().with_file("/h/f", "x", 0o644);
        let mut state = MemoryState::new();
        assert!(apply(&file("x", 0o600), &sys, &mut state, "/h/f"));
        assert_eq!(sys.mode("/h/f"), Some(0o600));
    }

    #[test]
    fn blank_file_removes_unless_empty_attr() {
        let sys = MemSystem::new().with_file("/h/f", "x", 0o644);
        let mut state = MemoryState::new();
        assert!(apply(&file(" \n", 0o644), &sys, &mut state, "/h/f"));
        assert!(!sys.exists("/h/f"));
        assert!(!apply(&file("", 0o644), &sys, &mut state, "/h/f"));
        assert_eq!(file("", 0o644).entry_state().kind, EntryState::remove().kind);

        let keep = TargetStateEntry::File {
            contents: Vec::new(),
            perm: 0o644,
            empty: true,
            overwrite: false,
        };
        assert!(apply(&keep, &sys, &mut state, "/h/f"));
        assert_eq!(sys.contents("/h/f").as_deref(), Some(""));
    }

    #[test]
    fn dir_replaces_file() {
        let sys = MemSystem::new().with_file("/h/d", "x", 0o644);
        let mut state = MemoryState::new();
        assert!(apply(&TargetStateEntry::Dir { perm: 0o755 }, &sys, &mut state, "/h/d"));
        assert_eq!(sys.mode("/h/d"), Some(0o755));
        assert!(sys.contents("/h/d").is_none());
    }

    #[test]
    fn symlink_replaced_only_on_change() {
        let sys = MemSystem::new().with_symlink("/h/l", "a");
        let mut state = MemoryState::new();
        let same = TargetStateEntry::Symlink { linkname: "a".into() };
        let other = TargetStateEntry::Symlink { linkname: "b".into() };
        assert!(!apply(&same, &sys, &mut state, "/h/l"));
        assert!(apply(&other, &sys, &mut state, "/h/l"));
        assert_eq!(sys.readlink(&p("/h/l")).unwrap(), "b");
    }

    // ------------------------------------------------------------------
    // scripts
    // ------------------------------------------------------------------

    #[test]
    fn once_script_runs_once() {
        let sys = MemSystem::new().with_dir("/h", 0o755);
        let mut state = MemoryState::new();
        let target = script("#!/bin/sh\necho hi\n", ScriptCondition::Once);
        assert!(apply(&target, &sys, &mut state, "/h/setup.sh"));
        assert!(!apply(&target, &sys, &mut state, "/h/setup.sh"));
        assert_eq!(sys.runs.lock().unwrap().len(), 1);
        assert_eq!(state.entries(SCRIPT_STATE_BUCKET).unwrap().len(), 1);
    }

    #[test]
    fn script_run_is_recorded_as_json() {
        let sys = MemSystem::new().with_dir("/h", 0o755);
        let mut state = MemoryState::new();
        let target = script("#!/bin/sh\necho hi\n", ScriptCondition::Once);
        assert!(apply(&target, &sys, &mut state, "/h/setup.sh"));
        let entries = state.entries(SCRIPT_STATE_BUCKET).unwrap();
        let (key, value) = &entries[0];
        assert_eq!(key, &sha256_hex(b"#!/bin/sh\necho hi\n"));
        let record: ScriptState = serde_json::from_slice(value).unwrap();
        assert_eq!(record.name, "setup.sh");
    }

    #[test]
    fn onchange_script_reruns_when_contents_change() {
        let sys = MemSystem::new().with_dir("/h", 0o755);
        let mut state = MemoryState::new();
        let v1 = script("#!/bin/sh\necho 1\n", ScriptCondition::OnChange);
        let v2 = script("#!/bin/sh\necho 2\n", ScriptCondition::OnChange);
        assert!(apply(&v1, &sys, &mut state, "/h/setup.sh"));
        assert!(!apply(&v1, &sys, &mut state, "/h/setup.sh"));
        assert!(apply(&v2, &sys, &mut state, "/h/setup.sh"));
        assert_eq!(sys.runs.lock().unwrap().len(), 2);
    }

    #[test]
    fn always_script_runs_every_time_and_empty_never() {
        let sys = MemSystem::new().with_dir("/h", 0o755);
        let mut state = MemoryState::new();
        let always = script("#!/bin/sh\n", ScriptCondition::Always);
        assert!(apply(&always, &sys, &mut state, "/h/setup.sh"));
        assert!(apply(&always, &sys, &mut state, "/h/setup.sh"));
        let empty = script("", ScriptCondition::Always);
        assert!(empty.skip_apply(&state, &p("/h/setup.sh")).unwrap());
    }
}
