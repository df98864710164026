//! Source entries and the lazy computation of their target state.
use std::cell::OnceCell;

use crate::attr::{DirAttr, FileAttr, ScriptOrder, SourceFileKind};
use crate::encryption::Encryption;
use crate::error::{EngineError, EngineResult};
use crate::exec::Cmd;
use crate::path::{AbsPath, RelPath, SourceRelPath};
use crate::system::{self, System, SystemError};
use crate::target::{TargetStateEntry, is_blank};
use crate::template::{MODIFY_TEMPLATE_MARKER, TemplateEngine};

/// Everything needed to turn a source entry into a target entry.
#[derive(Debug, Clone, Copy)]
pub struct TargetContext<'a> {
    /// Reads source files and the current destination.
    pub system: &'a dyn System,
    /// Decrypts `encrypted_` files.
    pub encryption: &'a dyn Encryption,
    /// Renders `.tmpl` files.
    pub templates: &'a TemplateEngine,
    /// Absolute source directory.
    pub source_dir: &'a AbsPath,
    /// Absolute destination directory.
    pub dest_dir: &'a AbsPath,
    /// Mask applied to every permission.
    pub umask: u32,
}

static REMOVE: TargetStateEntry = TargetStateEntry::Remove;

/// One managed entry in the source directory.
#[derive(Debug)]
pub enum SourceStateEntry {
    /// A source directory.
    Dir(SourceStateDir),
    /// A source file (regular, create, modify, script, symlink or remove).
    File(SourceStateFile),
    /// A removal synthesized from `.chezmoiremove` or an `exact_` parent.
    Remove(SourceStateRemove),
}

impl SourceStateEntry {
    /// Path of the entry within the source directory.
    #[must_use]
    pub const fn source_rel_path(&self) -> &SourceRelPath {
        match self {
            Self::Dir(d) => &d.source_rel_path,
            Self::File(f) => &f.source_rel_path,
            Self::Remove(r) => &r.source_rel_path,
        }
    }

    /// Human-readable origin, used in duplicate-entry errors.
    #[must_use]
    pub fn origin(&self) -> String {
        match self {
            Self::Remove(r) => r.origin.clone(),
            other => other.source_rel_path().to_string(),
        }
    }

    /// When this entry is applied relative to others.
    #[must_use]
    pub fn order(&self) -> ScriptOrder {
        match self {
            Self::File(f) if f.attr.kind == SourceFileKind::Script => f.attr.order,
            _ => ScriptOrder::During,
        }
    }

    /// The desired state, computed on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a source file cannot be read, decrypted or
    /// rendered, or a modify script fails.
    pub fn target(&self, ctx: &TargetContext<'_>) -> EngineResult<&TargetStateEntry> {
        match self {
            Self::Dir(d) => Ok(&d.target),
            Self::File(f) => f.target(ctx),
            Self::Remove(_) => Ok(&REMOVE),
        }
    }
}

/// A directory in the source state.
#[derive(Debug)]
pub struct SourceStateDir {
    /// Source-relative path.
    pub source_rel_path: SourceRelPath,
    /// Decoded attributes.
    pub attr: DirAttr,
    target: TargetStateEntry,
}

impl SourceStateDir {
    /// A directory whose target permissions are `attr.perm() & !umask`.
    #[must_use]
    pub const fn new(source_rel_path: SourceRelPath, attr: DirAttr, umask: u32) -> Self {
        let perm = attr.perm() & !umask;
        Self {
            source_rel_path,
            attr,
            target: TargetStateEntry::Dir { perm },
        }
    }
}

/// Where a file's raw bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceContents {
    /// A regular file in the source directory.
    File(AbsPath),
    /// A symlink inside an `external_` directory; the bytes are its target.
    Link(AbsPath),
}

/// A file in the source state.
#[derive(Debug)]
pub struct SourceStateFile {
    /// Source-relative path.
    pub source_rel_path: SourceRelPath,
    /// Target-relative path.
    pub target_rel_path: RelPath,
    /// Decoded attributes.
    pub attr: FileAttr,
    contents: SourceContents,
    plaintext: OnceCell<Vec<u8>>,
    target: OnceCell<TargetStateEntry>,
}

impl SourceStateFile {
    /// A file whose bytes are read lazily from `contents`.
    #[must_use]
    pub const fn new(
        source_rel_path: SourceRelPath,
        target_rel_path: RelPath,
        attr: FileAttr,
        contents: SourceContents,
    ) -> Self {
        Self {
            source_rel_path,
            target_rel_path,
            attr,
            contents,
            plaintext: OnceCell::new(),
            target: OnceCell::new(),
        }
    }

    /// Absolute path of the bytes on disk.
    #[must_use]
    pub const fn abs_path(&self) -> &AbsPath {
        match &self.contents {
            SourceContents::File(p) | SourceContents::Link(p) => p,
        }
    }

    /// The source bytes, decrypted if needed but not rendered.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decrypted.
    pub fn plaintext(&self, ctx: &TargetContext<'_>) -> EngineResult<&[u8]> {
        if let Some(data) = self.plaintext.get() {
            return Ok(data);
        }
        let raw = match &self.contents {
            SourceContents::File(path) => ctx.system.read_file(path)?,
            SourceContents::Link(path) => ctx.system.readlink(path)?.into_bytes(),
        };
        let data = if self.attr.encrypted {
            ctx.encryption.decrypt(ctx.system, &raw)?
        } else {
            raw
        };
        Ok(self.plaintext.get_or_init(|| data))
    }

    /// The desired state of the target, memoized.
    ///
    /// # Errors
    ///
    /// Returns an error attributed to the target path if it cannot be
    /// computed. Failures are not cached.
    pub fn target(&self, ctx: &TargetContext<'_>) -> EngineResult<&TargetStateEntry> {
        if let Some(target) = self.target.get() {
            return Ok(target);
        }
        let target = self
            .compute_target(ctx)
            .map_err(|e| e.at(&self.target_rel_path))?;
        Ok(self.target.get_or_init(|| target))
    }

    fn rendered(&self, ctx: &TargetContext<'_>) -> EngineResult<Vec<u8>> {
        let data = self.plaintext(ctx)?;
        if !self.attr.template {
            return Ok(data.to_vec());
        }
        let source = String::from_utf8_lossy(data);
        Ok(ctx
            .templates
            .render(&self.source_rel_path.to_string(), &source)?
            .into_bytes())
    }

    fn compute_target(&self, ctx: &TargetContext<'_>) -> EngineResult<TargetStateEntry> {
        let perm = self.attr.perm() & !ctx.umask;
        let dest = ctx.dest_dir.join(&self.target_rel_path);
        Ok(match self.attr.kind {
            SourceFileKind::File => TargetStateEntry::File {
                contents: self.rendered(ctx)?,
                perm,
                empty: self.attr.empty,
                overwrite: false,
            },
            SourceFileKind::Create => {
                let contents = match ctx.system.read_file(&dest) {
                    Ok(existing) => existing,
                    Err(e) if e.is_not_found() => self.rendered(ctx)?,
                    Err(e) => return Err(e.into()),
                };
                TargetStateEntry::File {
                    contents,
                    perm,
                    empty: self.attr.empty,
                    overwrite: false,
                }
            }
            SourceFileKind::Modify => TargetStateEntry::File {
                contents: self.modify(ctx, &dest)?,
                perm,
                empty: false,
                overwrite: true,
            },
            SourceFileKind::Remove => TargetStateEntry::Remove,
            SourceFileKind::Script => TargetStateEntry::Script {
                name: self.target_rel_path.clone(),
                contents: self.rendered(ctx)?,
                condition: self.attr.condition,
                order: self.attr.order,
            },
            SourceFileKind::Symlink => {
                let rendered = self.rendered(ctx)?;
                TargetStateEntry::Symlink {
                    linkname: String::from_utf8_lossy(&rendered).trim().to_string(),
                }
            }
        })
    }

    fn modify(&self, ctx: &TargetContext<'_>, dest: &AbsPath) -> EngineResult<Vec<u8>> {
        let current = match ctx.system.read_file(dest) {
            Ok(data) => data,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let modifier = self.rendered(ctx)?;
        if is_blank(&modifier) {
            return Ok(current);
        }

        let text = String::from_utf8_lossy(&modifier);
        if text.contains(MODIFY_TEMPLATE_MARKER) {
            let source: String = text
                .split_inclusive('\n')
                .filter(|line| !line.contains(MODIFY_TEMPLATE_MARKER))
                .collect();
            return Ok(ctx
                .templates
                .render_modify(&self.source_rel_path.to_string(), &source, &current)?
                .into_bytes());
        }

        let tmp = tempfile::Builder::new()
            .prefix("dotstate-modify.")
            .tempdir()
            .map_err(|e| SystemError::io("tempdir", dest, e))?;
        let script = AbsPath::new(tmp.path())
            .ok_or_else(|| {
                SystemError::io("tempdir", dest, std::io::ErrorKind::InvalidInput.into())
            })?
            .join_str(&self.attr.target_name);
        std::fs::write(script.as_path(), &modifier)
            .map_err(|e| SystemError::io("write", &script, e))?;
        system::set_mode(&script, 0o700).map_err(|e| SystemError::io("chmod", &script, e))?;

        let cmd = Cmd::new(script.as_str())
            .env("CHEZMOI_SOURCE_FILE", &self.source_rel_path.to_string())
            .stdin(current);
        let result = ctx.system.idempotent_cmd_output(&cmd)?;
        if !result.success {
            return Err(EngineError::Invalid {
                path: self.target_rel_path.clone(),
                message: format!(
                    "modify script failed (exit {}): {}",
                    result.code.unwrap_or(-1),
                    result.stderr.trim()
                ),
            });
        }
        Ok(result.stdout)
    }
}

/// A target that must not exist.
#[derive(Debug)]
pub struct SourceStateRemove {
    /// Source-relative path of the file or directory that asked for it.
    pub source_rel_path: SourceRelPath,
    /// Human-readable origin.
    pub origin: String,
}
