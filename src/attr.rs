//! Attribute codec: source file names ⇄ directory and file attributes.
//!
//! A source name such as `private_executable_dot_bin.tmpl` encodes the
//! target name (`.bin`) together with its type and permission attributes.
//! [`DirAttr::decode`]/[`DirAttr::encode`] and
//! [`FileAttr::decode`]/[`FileAttr::encode`] are mutual inverses: every
//! name accepted by `decode` is reproduced byte-for-byte by `encode`, so
//! rewriting attributes never introduces a spurious rename.
use thiserror::Error;

const AFTER: &str = "after_";
const BEFORE: &str = "before_";
const CREATE: &str = "create_";
const DOT: &str = "dot_";
const EMPTY: &str = "empty_";
const ENCRYPTED: &str = "encrypted_";
const EXACT: &str = "exact_";
const EXECUTABLE: &str = "executable_";
const EXTERNAL: &str = "external_";
const LITERAL: &str = "literal_";
const MODIFY: &str = "modify_";
const ONCE: &str = "once_";
const ONCHANGE: &str = "onchange_";
const PRIVATE: &str = "private_";
const READONLY: &str = "readonly_";
const REMOVE: &str = "remove_";
const RUN: &str = "run_";
const SYMLINK: &str = "symlink_";

/// Suffix marking a template.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";
/// Suffix that protects a literal `.tmpl`/`.literal` ending.
pub const LITERAL_SUFFIX: &str = ".literal";

const DIR_RESERVED: &[&str] = &[DOT, EXACT, EXTERNAL, LITERAL, PRIVATE, READONLY, REMOVE];

const FILE_RESERVED: &[&str] = &[
    AFTER, BEFORE, CREATE, DOT, EMPTY, ENCRYPTED, EXECUTABLE, LITERAL, MODIFY, ONCE, ONCHANGE,
    PRIVATE, READONLY, REMOVE, RUN, SYMLINK,
];

/// Errors produced while decoding a source name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrError {
    /// The name decodes to an empty target name.
    #[error("{name}: empty target name")]
    EmptyName {
        /// The offending source name.
        name: String,
    },

    /// A plain source name starts with `.`; use `dot_` instead.
    #[error("{name}: leading '.' must be written as dot_")]
    LeadingDot {
        /// The offending source name.
        name: String,
    },

    /// An attribute prefix appears where it cannot apply (out of order, or
    /// not valid for this entry type).
    #[error("{name}: unexpected attribute {prefix}, use literal_ to keep it in the target name")]
    UnexpectedPrefix {
        /// The offending source name.
        name: String,
        /// The misplaced prefix.
        prefix: String,
    },

    /// A `.tmpl` or `.literal` ending appears where it cannot apply.
    #[error("{name}: unexpected suffix {suffix}, use .literal to keep it in the target name")]
    UnexpectedSuffix {
        /// The offending source name.
        name: String,
        /// The misplaced suffix.
        suffix: String,
    },

    /// A `literal_` prefix or `.literal` suffix protects nothing.
    #[error("{name}: redundant {marker}")]
    RedundantLiteral {
        /// The offending source name.
        name: String,
        /// The redundant marker.
        marker: String,
    },

    /// `encrypted_` without the configured encrypted suffix.
    #[error("{name}: encrypted_ requires the {suffix} suffix")]
    MissingEncryptedSuffix {
        /// The offending source name.
        name: String,
        /// The expected suffix.
        suffix: String,
    },
}

/// The kind of target a source file produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFileKind {
    /// A regular file.
    #[default]
    File,
    /// A file written only if absent.
    Create,
    /// A file whose contents come from modifying the existing file.
    Modify,
    /// A target that is removed.
    Remove,
    /// A script that is run rather than written.
    Script,
    /// A symbolic link.
    Symlink,
}

/// When a script runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptCondition {
    /// Every apply.
    #[default]
    Always,
    /// Once per distinct contents.
    Once,
    /// Whenever the contents change.
    OnChange,
}

/// Where a script runs relative to file updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOrder {
    /// Before any file is updated.
    Before,
    /// Interleaved with files in path order.
    #[default]
    During,
    /// After all files are updated.
    After,
}

/// Attributes encoded in a source directory name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirAttr {
    /// The target directory name.
    pub target_name: String,
    /// Extra destination children are removed.
    pub exact: bool,
    /// Contents are copied verbatim, without attribute decoding.
    pub external: bool,
    /// No group/other permissions.
    pub private: bool,
    /// No write permissions.
    pub read_only: bool,
    /// The directory is removed once empty.
    pub remove: bool,
}

impl DirAttr {
    /// Decode a source directory name.
    ///
    /// # Errors
    ///
    /// Returns an [`AttrError`] if the name is not in canonical form.
    pub fn decode(name: &str) -> Result<Self, AttrError> {
        let mut attr = Self::default();
        let mut rest = name;
        if let Some(r) = rest.strip_prefix(REMOVE) {
            attr.remove = true;
            rest = r;
        } else {
            strip_flag(&mut rest, EXTERNAL, &mut attr.external);
            strip_flag(&mut rest, EXACT, &mut attr.exact);
            strip_flag(&mut rest, PRIVATE, &mut attr.private);
            strip_flag(&mut rest, READONLY, &mut attr.read_only);
        }
        attr.target_name = decode_target_name(name, rest, DIR_RESERVED)?;
        Ok(attr)
    }

    /// Encode as a canonical source directory name.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut s = String::new();
        if self.remove {
            s.push_str(REMOVE);
        } else {
            push_if(&mut s, self.external, EXTERNAL);
            push_if(&mut s, self.exact, EXACT);
            push_if(&mut s, self.private, PRIVATE);
            push_if(&mut s, self.read_only, READONLY);
        }
        s.push_str(&encode_target_name(&self.target_name, DIR_RESERVED));
        s
    }

    /// Permission bits before the umask is applied.
    #[must_use]
    pub const fn perm(&self) -> u32 {
        let mut perm = 0o777;
        if self.private {
            perm &= !0o077;
        }
        if self.read_only {
            perm &= !0o222;
        }
        perm
    }

    /// Build attributes from an observed directory mode.
    #[must_use]
    pub fn from_mode(target_name: &str, mode: u32, exact: bool) -> Self {
        Self {
            target_name: target_name.to_string(),
            exact,
            private: is_private(mode),
            read_only: is_read_only(mode),
            ..Self::default()
        }
    }
}

/// Attributes encoded in a source file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FileAttr {
    /// The target file name.
    pub target_name: String,
    /// What the file produces.
    pub kind: SourceFileKind,
    /// An empty file is kept rather than removed.
    pub empty: bool,
    /// Contents are ciphertext.
    pub encrypted: bool,
    /// Execute permissions.
    pub executable: bool,
    /// No group/other permissions.
    pub private: bool,
    /// No write permissions.
    pub read_only: bool,
    /// Contents are a template.
    pub template: bool,
    /// Script run condition.
    pub condition: ScriptCondition,
    /// Script run order.
    pub order: ScriptOrder,
}

impl FileAttr {
    /// Decode a source file name.
    ///
    /// # Errors
    ///
    /// Returns an [`AttrError`] if the name is not in canonical form.
    pub fn decode(name: &str, encrypted_suffix: &str) -> Result<Self, AttrError> {
        let mut attr = Self::default();
        let mut rest = name;
        if let Some(r) = rest.strip_prefix(CREATE) {
            attr.kind = SourceFileKind::Create;
            rest = r;
            strip_flag(&mut rest, ENCRYPTED, &mut attr.encrypted);
            strip_flag(&mut rest, PRIVATE, &mut attr.private);
            strip_flag(&mut rest, READONLY, &mut attr.read_only);
            strip_flag(&mut rest, EMPTY, &mut attr.empty);
            strip_flag(&mut rest, EXECUTABLE, &mut attr.executable);
        } else if let Some(r) = rest.strip_prefix(REMOVE) {
            attr.kind = SourceFileKind::Remove;
            rest = r;
        } else if let Some(r) = rest.strip_prefix(RUN) {
            attr.kind = SourceFileKind::Script;
            rest = r;
            if let Some(r) = rest.strip_prefix(ONCE) {
                attr.condition = ScriptCondition::Once;
                rest = r;
            } else if let Some(r) = rest.strip_prefix(ONCHANGE) {
                attr.condition = ScriptCondition::OnChange;
                rest = r;
            }
            if let Some(r) = rest.strip_prefix(BEFORE) {
                attr.order = ScriptOrder::Before;
                rest = r;
            } else if let Some(r) = rest.strip_prefix(AFTER) {
                attr.order = ScriptOrder::After;
                rest = r;
            }
        } else if let Some(r) = rest.strip_prefix(SYMLINK) {
            attr.kind = SourceFileKind::Symlink;
            rest = r;
        } else if let Some(r) = rest.strip_prefix(MODIFY) {
            attr.kind = SourceFileKind::Modify;
            rest = r;
            strip_flag(&mut rest, ENCRYPTED, &mut attr.encrypted);
            strip_flag(&mut rest, PRIVATE, &mut attr.private);
            strip_flag(&mut rest, READONLY, &mut attr.read_only);
            strip_flag(&mut rest, EXECUTABLE, &mut attr.executable);
        } else {
            strip_flag(&mut rest, ENCRYPTED, &mut attr.encrypted);
            strip_flag(&mut rest, PRIVATE, &mut attr.private);
            strip_flag(&mut rest, READONLY, &mut attr.read_only);
            strip_flag(&mut rest, EMPTY, &mut attr.empty);
            strip_flag(&mut rest, EXECUTABLE, &mut attr.executable);
        }

        if attr.encrypted {
            rest = rest
                .strip_suffix(encrypted_suffix)
                .ok_or_else(|| AttrError::MissingEncryptedSuffix {
                    name: name.to_string(),
                    suffix: encrypted_suffix.to_string(),
                })?;
        }

        if let Some(r) = rest.strip_suffix(LITERAL_SUFFIX) {
            rest = strip_literal_suffix(name, r)?;
        } else if let Some(r) = rest.strip_suffix(TEMPLATE_SUFFIX) {
            attr.template = true;
            rest = match r.strip_suffix(LITERAL_SUFFIX) {
                Some(r) => strip_literal_suffix(name, r)?,
                None if needs_literal_suffix(r) => {
                    return Err(AttrError::UnexpectedSuffix {
                        name: name.to_string(),
                        suffix: r.rsplit('.').next().map(|s| format!(".{s}")).unwrap_or_default(),
                    });
                }
                None => r,
            };
        }

        attr.target_name = decode_target_name(name, rest, FILE_RESERVED)?;
        Ok(attr)
    }

    /// Encode as a canonical source file name.
    #[must_use]
    pub fn encode(&self, encrypted_suffix: &str) -> String {
        let mut s = String::new();
        let mut encrypted = false;
        match self.kind {
            SourceFileKind::File => {
                push_if(&mut s, self.encrypted, ENCRYPTED);
                push_if(&mut s, self.private, PRIVATE);
                push_if(&mut s, self.read_only, READONLY);
                push_if(&mut s, self.empty, EMPTY);
                push_if(&mut s, self.executable, EXECUTABLE);
                encrypted = self.encrypted;
            }
            SourceFileKind::Create => {
                s.push_str(CREATE);
                push_if(&mut s, self.encrypted, ENCRYPTED);
                push_if(&mut s, self.private, PRIVATE);
                push_if(&mut s, self.read_only, READONLY);
                push_if(&mut s, self.empty, EMPTY);
                push_if(&mut s, self.executable, EXECUTABLE);
                encrypted = self.encrypted;
            }
            SourceFileKind::Modify => {
                s.push_str(MODIFY);
                push_if(&mut s, self.encrypted, ENCRYPTED);
                push_if(&mut s, self.private, PRIVATE);
                push_if(&mut s, self.read_only, READONLY);
                push_if(&mut s, self.executable, EXECUTABLE);
                encrypted = self.encrypted;
            }
            SourceFileKind::Remove => s.push_str(REMOVE),
            SourceFileKind::Script => {
                s.push_str(RUN);
                match self.condition {
                    ScriptCondition::Always => {}
                    ScriptCondition::Once => s.push_str(ONCE),
                    ScriptCondition::OnChange => s.push_str(ONCHANGE),
                }
                match self.order {
                    ScriptOrder::Before => s.push_str(BEFORE),
                    ScriptOrder::During => {}
                    ScriptOrder::After => s.push_str(AFTER),
                }
            }
            SourceFileKind::Symlink => s.push_str(SYMLINK),
        }
        s.push_str(&encode_target_name(&self.target_name, FILE_RESERVED));
        // Checked on the encoded name, as decode sees it: `.tmpl` is `dot_tmpl`.
        if needs_literal_suffix(&s) {
            s.push_str(LITERAL_SUFFIX);
        }
        if self.template {
            s.push_str(TEMPLATE_SUFFIX);
        }
        if encrypted {
            s.push_str(encrypted_suffix);
        }
        s
    }

    /// Permission bits before the umask is applied.
    #[must_use]
    pub const fn perm(&self) -> u32 {
        let mut perm = 0o666;
        if self.executable {
            perm |= 0o111;
        }
        if self.private {
            perm &= !0o077;
        }
        if self.read_only {
            perm &= !0o222;
        }
        perm
    }

    /// Build attributes for a regular file from an observed mode.
    #[must_use]
    pub fn from_mode(target_name: &str, mode: u32) -> Self {
        Self {
            target_name: target_name.to_string(),
            executable: mode & 0o111 != 0,
            private: is_private(mode),
            read_only: is_read_only(mode),
            ..Self::default()
        }
    }

    /// Drop attributes that carry no meaning for this kind so that two
    /// attribute sets that encode identically also compare equal.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match self.kind {
            SourceFileKind::File | SourceFileKind::Create => {
                self.condition = ScriptCondition::Always;
                self.order = ScriptOrder::During;
            }
            SourceFileKind::Modify => {
                self.empty = false;
                self.condition = ScriptCondition::Always;
                self.order = ScriptOrder::During;
            }
            SourceFileKind::Script => {
                self.empty = false;
                self.encrypted = false;
                self.executable = false;
                self.private = false;
                self.read_only = false;
            }
            SourceFileKind::Remove | SourceFileKind::Symlink => {
                self.empty = false;
                self.encrypted = false;
                self.executable = false;
                self.private = false;
                self.read_only = false;
                self.condition = ScriptCondition::Always;
                self.order = ScriptOrder::During;
            }
        }
        self
    }
}

const fn is_private(mode: u32) -> bool {
    mode & 0o077 == 0
}

const fn is_read_only(mode: u32) -> bool {
    mode & 0o222 == 0
}

fn strip_flag(rest: &mut &str, prefix: &str, flag: &mut bool) {
    if let Some(r) = rest.strip_prefix(prefix) {
        *rest = r;
        *flag = true;
    }
}

fn push_if(s: &mut String, cond: bool, prefix: &str) {
    if cond {
        s.push_str(prefix);
    }
}

fn reserved_prefix<'a>(name: &str, reserved: &[&'a str]) -> Option<&'a str> {
    reserved.iter().copied().find(|p| name.starts_with(p))
}

fn needs_literal_suffix(name: &str) -> bool {
    name.ends_with(LITERAL_SUFFIX) || name.ends_with(TEMPLATE_SUFFIX)
}

fn strip_literal_suffix<'a>(name: &str, rest: &'a str) -> Result<&'a str, AttrError> {
    if needs_literal_suffix(rest) {
        Ok(rest)
    } else {
        Err(AttrError::RedundantLiteral {
            name: name.to_string(),
            marker: LITERAL_SUFFIX.to_string(),
        })
    }
}

fn decode_target_name(name: &str, rest: &str, reserved: &[&str]) -> Result<String, AttrError> {
    let target = if let Some(r) = rest.strip_prefix(DOT) {
        format!(".{r}")
    } else if let Some(r) = rest.strip_prefix(LITERAL) {
        if r.starts_with('.') || reserved_prefix(r, reserved).is_none() {
            return Err(AttrError::RedundantLiteral {
                name: name.to_string(),
                marker: LITERAL.to_string(),
            });
        }
        r.to_string()
    } else if rest.starts_with('.') {
        return Err(AttrError::LeadingDot {
            name: name.to_string(),
        });
    } else if let Some(prefix) = reserved_prefix(rest, reserved) {
        return Err(AttrError::UnexpectedPrefix {
            name: name.to_string(),
            prefix: prefix.to_string(),
        });
    } else {
        rest.to_string()
    };
    if target.is_empty() || target == "." {
        return Err(AttrError::EmptyName {
            name: name.to_string(),
        });
    }
    Ok(target)
}

fn encode_target_name(target: &str, reserved: &[&str]) -> String {
    if let Some(r) = target.strip_prefix('.') {
        format!("{DOT}{r}")
    } else if reserved_prefix(target, reserved).is_some() {
        format!("{LITERAL}{target}")
    } else {
        target.to_string()
    }
}
