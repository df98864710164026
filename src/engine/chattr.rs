//! Attribute modifiers: `+template,-private,noencrypted,once,before`.
use thiserror::Error;

use crate::attr::{DirAttr, FileAttr, ScriptCondition, ScriptOrder, SourceFileKind};
use crate::error::{EngineError, EngineResult};
use crate::path::RelPath;
use crate::source::{SourceState, SourceStateEntry};
use crate::system::System;

/// A modifier string could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModifierError {
    /// The attribute name is not recognised.
    #[error("{0}: unknown attribute")]
    UnknownAttribute(String),
}

/// A change along one attribute axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Change<T> {
    /// Keep the current value.
    #[default]
    Leave,
    /// Set to this value.
    Set(T),
    /// If the current value is this, reset it to the axis default.
    Clear(T),
}

impl<T: Copy + PartialEq> Change<T> {
    fn apply(self, current: T, default: T) -> T {
        match self {
            Self::Leave => current,
            Self::Set(value) => value,
            Self::Clear(value) if current == value => default,
            Self::Clear(_) => current,
        }
    }
}

impl Change<bool> {
    fn flag(self, current: bool) -> bool {
        self.apply(current, false)
    }
}

/// A parsed set of attribute changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifier {
    kind: Change<SourceFileKind>,
    condition: Change<ScriptCondition>,
    order: Change<ScriptOrder>,
    empty: Change<bool>,
    encrypted: Change<bool>,
    exact: Change<bool>,
    executable: Change<bool>,
    private: Change<bool>,
    read_only: Change<bool>,
    template: Change<bool>,
}

impl Modifier {
    /// Parse a comma-separated list. `-x` and `nox` clear `x`; `+x` and
    /// `x` set it.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown attribute.
    pub fn parse(s: &str) -> Result<Self, ModifierError> {
        let mut m = Self::default();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (set, name) = if let Some(rest) = item.strip_prefix('-') {
                (false, rest)
            } else if let Some(rest) = item.strip_prefix('+') {
                (true, rest)
            } else if let Some(rest) = item.strip_prefix("no") {
                (false, rest)
            } else {
                (true, item)
            };
            match name {
                "after" | "a" => m.order = change(set, ScriptOrder::After),
                "before" | "b" => m.order = change(set, ScriptOrder::Before),
                "once" | "o" => m.condition = change(set, ScriptCondition::Once),
                "onchange" => m.condition = change(set, ScriptCondition::OnChange),
                "create" => m.kind = change(set, SourceFileKind::Create),
                "modify" => m.kind = change(set, SourceFileKind::Modify),
                "script" => m.kind = change(set, SourceFileKind::Script),
                "symlink" => m.kind = change(set, SourceFileKind::Symlink),
                "empty" | "e" => m.empty = Change::Set(set),
                "encrypted" => m.encrypted = Change::Set(set),
                "exact" => m.exact = Change::Set(set),
                "executable" | "x" => m.executable = Change::Set(set),
                "private" | "p" => m.private = Change::Set(set),
                "readonly" | "r" => m.read_only = Change::Set(set),
                "template" | "t" => m.template = Change::Set(set),
                other => return Err(ModifierError::UnknownAttribute(other.to_string())),
            }
        }
        Ok(m)
    }

    /// Apply to directory attributes.
    #[must_use]
    pub fn modify_dir(&self, attr: &DirAttr) -> DirAttr {
        DirAttr {
            exact: self.exact.flag(attr.exact),
            private: self.private.flag(attr.private),
            read_only: self.read_only.flag(attr.read_only),
            ..attr.clone()
        }
    }

    /// Apply to file attributes, dropping any that the resulting kind does
    /// not carry.
    #[must_use]
    pub fn modify_file(&self, attr: &FileAttr) -> FileAttr {
        FileAttr {
            target_name: attr.target_name.clone(),
            kind: self.kind.apply(attr.kind, SourceFileKind::File),
            empty: self.empty.flag(attr.empty),
            encrypted: self.encrypted.flag(attr.encrypted),
            executable: self.executable.flag(attr.executable),
            private: self.private.flag(attr.private),
            read_only: self.read_only.flag(attr.read_only),
            template: self.template.flag(attr.template),
            condition: self.condition.apply(attr.condition, ScriptCondition::Always),
            order: self.order.apply(attr.order, ScriptOrder::During),
        }
        .normalized()
    }
}

const fn change<T>(set: bool, value: T) -> Change<T> {
    if set {
        Change::Set(value)
    } else {
        Change::Clear(value)
    }
}

/// Rename the source entries of `targets` to carry the modified
/// attributes. Children are processed before their parents.
///
/// When `encrypted` changes, the contents are re-encoded into a new file
/// and the old file is removed afterwards.
///
/// # Errors
///
/// Returns an error if a target is not managed or a source file cannot
/// be read, re-encoded or renamed.
pub fn chattr(
    source: &SourceState,
    source_system: &dyn System,
    modifier: &Modifier,
    targets: &[RelPath],
) -> EngineResult<Vec<RelPath>> {
    let mut targets = targets.to_vec();
    targets.sort_by(|a, b| b.cmp(a));
    targets.dedup();

    let suffix = source.encryption().encrypted_suffix();
    let mut changed = Vec::new();
    for rel in targets {
        let entry = source
            .entry(&rel)
            .ok_or_else(|| EngineError::NotInSource(rel.clone()))?;
        let (parent, base) = entry.source_rel_path().split();
        let old_path = source.source_dir().join(entry.source_rel_path().rel_path());
        match entry {
            SourceStateEntry::Dir(dir) => {
                let name = modifier.modify_dir(&dir.attr).encode();
                if name == base.rel_path().as_str() {
                    continue;
                }
                let new_path = source
                    .source_dir()
                    .join(&parent.rel_path().join_str(&name));
                source_system
                    .rename(&old_path, &new_path)
                    .map_err(|e| EngineError::from(e).at(&rel))?;
            }
            SourceStateEntry::File(file) => {
                let attr = modifier.modify_file(&file.attr);
                let name = attr.encode(suffix);
                if name == base.rel_path().as_str() {
                    continue;
                }
                let new_path = source
                    .source_dir()
                    .join(&parent.rel_path().join_str(&name));
                if attr.encrypted == file.attr.encrypted {
                    source_system
                        .rename(&old_path, &new_path)
                        .map_err(|e| EngineError::from(e).at(&rel))?;
                } else {
                    let raw = source_system.read_file(&old_path)?;
                    let contents = if attr.encrypted {
                        source.encryption().encrypt(source_system, &raw)?
                    } else {
                        source.encryption().decrypt(source_system, &raw)?
                    };
                    let perm = source_system.lstat(&old_path)?.mode & 0o7777;
                    source_system.write_file(&new_path, &contents, perm)?;
                    source_system.remove(&old_path)?;
                }
            }
            SourceStateEntry::Remove(_) => continue,
        }
        changed.push(rel);
    }
    Ok(changed)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::test_helpers;
    use crate::system::test_helpers::MemSystem;

    fn file(name: &str) -> FileAttr {
        FileAttr::decode(name, ".xor").unwrap()
    }

    fn modify(modifier: &str, name: &str) -> String {
        Modifier::parse(modifier)
            .unwrap()
            .modify_file(&file(name))
            .encode(".xor")
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    #[test]
    fn parse_accepts_every_spelling() {
        let long = Modifier::parse("+template,-private,noexecutable").unwrap();
        let short = Modifier::parse("t, -p, nox").unwrap();
        assert_eq!(long, short);
    }

    #[test]
    fn parse_rejects_unknown_attribute() {
        let err = Modifier::parse("template,bogus").unwrap_err();
        assert_eq!(err.to_string(), "bogus: unknown attribute");
    }

    #[test]
    fn empty_items_are_ignored() {
        assert_eq!(Modifier::parse(" , ,").unwrap(), Modifier::default());
    }

    // ------------------------------------------------------------------
    // Attribute changes
    // ------------------------------------------------------------------

    #[test]
    fn flags_set_and_clear() {
        assert_eq!(modify("+template,-private", "private_dot_a"), "dot_a.tmpl");
        assert_eq!(modify("x,readonly", "dot_a"), "readonly_executable_dot_a");
        assert_eq!(modify("noencrypted", "encrypted_dot_a.xor"), "dot_a");
    }

    #[test]
    fn kind_changes_drop_meaningless_flags() {
        assert_eq!(modify("script", "private_dot_a.sh"), "run_dot_a.sh");
        assert_eq!(modify("-script", "run_a.sh"), "a.sh");
        assert_eq!(modify("-create", "dot_a"), "dot_a");
        assert_eq!(modify("symlink", "dot_a"), "symlink_dot_a");
    }

    #[test]
    fn script_condition_and_order() {
        assert_eq!(modify("once,before", "run_a.sh"), "run_once_before_a.sh");
        assert_eq!(modify("-once", "run_once_a.sh"), "run_a.sh");
        assert_eq!(modify("-once", "run_onchange_a.sh"), "run_onchange_a.sh");
        assert_eq!(modify("-after", "run_after_a.sh"), "run_a.sh");
    }

    #[test]
    fn dir_modifiers() {
        let m = Modifier::parse("exact,-private,template").unwrap();
        let attr = DirAttr::decode("private_dot_config").unwrap();
        assert_eq!(m.modify_dir(&attr).encode(), "exact_dot_config");
    }

    // ------------------------------------------------------------------
    // Renaming source entries
    // ------------------------------------------------------------------

    #[test]
    fn children_are_renamed_before_parents() {
        let sys = Arc::new(
            MemSystem::new()
                .with_file("/src/dot_config/rc", "x", 0o644)
                .with_dir("/src/dot_config", 0o755),
        );
        let source = test_helpers::read(&sys);
        let modifier = Modifier::parse("private").unwrap();
        let changed = chattr(
            &source,
            sys.as_ref(),
            &modifier,
            &[RelPath::new(".config"), RelPath::new(".config/rc")],
        )
        .unwrap();
        assert_eq!(changed, [RelPath::new(".config/rc"), RelPath::new(".config")]);
        assert_eq!(
            sys.contents("/src/private_dot_config/private_rc").unwrap(),
            "x"
        );
    }

    #[test]
    fn unchanged_names_are_left_alone() {
        let sys = Arc::new(MemSystem::new().with_file("/src/dot_a.tmpl", "x", 0o644));
        let source = test_helpers::read(&sys);
        let modifier = Modifier::parse("template").unwrap();
        let changed = chattr(&source, sys.as_ref(), &modifier, &[RelPath::new(".a")]).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn encrypting_rewrites_contents() {
        let sys = Arc::new(MemSystem::new().with_file("/src/dot_secret", "plain", 0o600));
        let source = test_helpers::read(&sys);
        let modifier = Modifier::parse("encrypted").unwrap();
        chattr(&source, sys.as_ref(), &modifier, &[RelPath::new(".secret")]).unwrap();
        assert!(!sys.exists("/src/dot_secret"));
        let ciphertext = sys.contents("/src/encrypted_dot_secret.xor").unwrap();
        assert_ne!(ciphertext, "plain");

        let source = test_helpers::read(&sys);
        let modifier = Modifier::parse("-encrypted").unwrap();
        chattr(&source, sys.as_ref(), &modifier, &[RelPath::new(".secret")]).unwrap();
        assert_eq!(sys.contents("/src/dot_secret").unwrap(), "plain");
    }

    #[test]
    fn unmanaged_target_is_an_error() {
        let sys = Arc::new(MemSystem::new().with_dir("/src", 0o755));
        let source = test_helpers::read(&sys);
        let err = chattr(
            &source,
            sys.as_ref(),
            &Modifier::default(),
            &[RelPath::new(".nope")],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), ".nope: not in source state");
    }
}
