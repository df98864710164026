//! The single effect boundary through which all filesystem and process
//! effects happen.
//!
//! Every algorithm is written once against [`System`]. Behaviour such as
//! dry-run, read-only enforcement, diff rendering and archive export comes
//! from wrapping a [`RealSystem`] in decorators:
//!
//! ```text
//! ReadOnlySystem            (outermost: rejects writes even in dry-run)
//! └── GitDiffSystem         (renders a unified diff of each mutation)
//!     └── DryRunSystem      (swallows mutations)
//!         └── RealSystem    (std::fs)
//! ```
mod archive;
mod debug;
mod dry_run;
mod dump;
mod git_diff;
mod read_only;
mod real;

use std::fmt;

use thiserror::Error;

use crate::exec::{Cmd, ExecError, ExecResult};
use crate::path::{AbsPath, RelPath};

pub use archive::{ArchiveFormat, TarWriterSystem};
pub use debug::DebugSystem;
pub use dry_run::DryRunSystem;
pub use dump::{DumpEntry, DumpSystem};
pub use git_diff::{GitDiffSystem, unified_diff};
pub use read_only::ReadOnlySystem;
pub use real::RealSystem;
pub(crate) use real::set_mode;

/// The type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A directory.
    Dir,
    /// A regular file.
    File,
    /// A symbolic link.
    Symlink,
    /// Anything else (sockets, devices, fifos).
    Other,
}

/// Metadata returned by [`System::lstat`] and [`System::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Entry type.
    pub kind: FileKind,
    /// Permission bits.
    pub mode: u32,
    /// Size in bytes.
    pub size: u64,
}

impl FileInfo {
    /// Whether this is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

/// One entry of [`System::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Base name.
    pub name: String,
    /// Metadata from `lstat`.
    pub info: FileInfo,
}

/// Errors from a [`System`].
#[derive(Error, Debug)]
pub enum SystemError {
    /// An I/O operation failed on `path`.
    #[error("{op} {path}: {source}")]
    Io {
        /// Operation name.
        op: &'static str,
        /// Offending path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A mutation was attempted through a read-only system.
    #[error("{op} {path}: read-only system")]
    ReadOnly {
        /// Operation name.
        op: &'static str,
        /// Offending path.
        path: String,
    },

    /// An external command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// A glob pattern was invalid.
    #[error("invalid pattern {pattern}: {message}")]
    Pattern {
        /// The pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },

    /// An archive could not be written.
    #[error("archive {path}: {source}")]
    Archive {
        /// Entry being written.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl SystemError {
    /// Build an [`SystemError::Io`].
    #[must_use]
    pub fn io(op: &'static str, path: &AbsPath, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_string(),
            source,
        }
    }

    /// A synthetic not-found error, used by decorators that hide entries.
    #[must_use]
    pub fn not_found(op: &'static str, path: &AbsPath) -> Self {
        Self::io(op, path, std::io::ErrorKind::NotFound.into())
    }

    /// Whether this error means the entry does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Whether this error means a directory was not empty.
    #[must_use]
    pub fn is_dir_not_empty(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::DirectoryNotEmpty)
    }
}

/// Result alias for [`System`] operations.
pub type SystemResult<T> = Result<T, SystemError>;

/// Options for [`System::run_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun<'a> {
    /// Target-relative name, used for the temp file and in diagnostics.
    pub name: &'a RelPath,
    /// Working directory.
    pub dir: &'a AbsPath,
    /// Script contents.
    pub contents: &'a [u8],
}

/// Filesystem and process primitives.
pub trait System: Send + Sync + fmt::Debug {
    /// Metadata without following a final symlink.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be inspected.
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo>;

    /// Metadata following symlinks.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be inspected.
    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo>;

    /// Directory entries sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>>;

    /// File contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>>;

    /// Symlink target.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a readable symlink.
    fn readlink(&self, path: &AbsPath) -> SystemResult<String>;

    /// Write a file with `perm` (before umask).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> SystemResult<()>;

    /// Create a symlink at `path` pointing to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()>;

    /// Create a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()>;

    /// Change permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions cannot be changed.
    fn chmod(&self, path: &AbsPath, perm: u32) -> SystemResult<()>;

    /// Remove a file or empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be removed.
    fn remove(&self, path: &AbsPath) -> SystemResult<()>;

    /// Remove recursively; a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be removed.
    fn remove_all(&self, path: &AbsPath) -> SystemResult<()>;

    /// Rename an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be renamed.
    fn rename(&self, from: &AbsPath, to: &AbsPath) -> SystemResult<()>;

    /// Run a command that has side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot run or fails.
    fn run_cmd(&self, cmd: &Cmd) -> SystemResult<ExecResult>;

    /// Run a command whose output depends only on its inputs; decorators
    /// pass it through even in dry-run.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot run or fails.
    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult>;

    /// Run a script.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot run or exits non-zero.
    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()>;

    /// Paths matching a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>>;
}

/// Create `path` and any missing parents.
///
/// # Errors
///
/// Returns an error if a component exists and is not a directory, or a
/// directory cannot be created.
pub fn mkdir_all(system: &dyn System, path: &AbsPath, perm: u32) -> SystemResult<()> {
    match system.stat(path) {
        Ok(info) if info.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(SystemError::io(
                "mkdir",
                path,
                std::io::ErrorKind::NotADirectory.into(),
            ));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    let parent = path.parent();
    if parent != *path {
        mkdir_all(system, &parent, perm)?;
    }
    system.mkdir(path, perm)
}

/// Recursively visit `root` and everything beneath it in lexical order,
/// calling `f` with each path and its `lstat` metadata. Returning
/// `Ok(false)` from `f` for a directory skips its children.
///
/// # Errors
///
/// Propagates any error from the system or from `f`.
pub fn walk<E>(
    system: &dyn System,
    root: &AbsPath,
    f: &mut dyn FnMut(&AbsPath, &FileInfo) -> Result<bool, E>,
) -> Result<(), E>
where
    E: From<SystemError>,
{
    let info = system.lstat(root)?;
    walk_inner(system, root, &info, f)
}

fn walk_inner<E>(
    system: &dyn System,
    path: &AbsPath,
    info: &FileInfo,
    f: &mut dyn FnMut(&AbsPath, &FileInfo) -> Result<bool, E>,
) -> Result<(), E>
where
    E: From<SystemError>,
{
    let descend = f(path, info)?;
    if descend && info.is_dir() {
        for entry in system.read_dir(path)? {
            walk_inner(system, &path.join_str(&entry.name), &entry.info, f)?;
        }
    }
    Ok(())
}


#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::test_helpers::MemSystem;
    use super::*;

    fn abs(p: &str) -> AbsPath {
        AbsPath::new(p).unwrap()
    }

    #[test]
    fn mkdir_all_creates_missing_parents() {
        let sys = MemSystem::new().with_dir("/home", 0o755);
        mkdir_all(&sys, &abs("/home/u/a/b"), 0o755).unwrap();
        assert!(sys.exists("/home/u/a"));
        assert!(sys.exists("/home/u/a/b"));
    }

    #[test]
    fn mkdir_all_rejects_file_component() {
        let sys = MemSystem::new().with_file("/home/u", "", 0o644);
        assert!(mkdir_all(&sys, &abs("/home/u"), 0o755).is_err());
    }

    #[test]
    fn walk_visits_in_lexical_order_and_can_prune() {
        let sys = MemSystem::new()
            .with_file("/r/b", "", 0o644)
            .with_file("/r/a/x", "", 0o644)
            .with_file("/r/c/y", "", 0o644);
        let mut seen = Vec::new();
        walk::<SystemError>(&sys, &abs("/r"), &mut |p, _| {
            seen.push(p.to_string());
            Ok(p.base() != "c")
        })
        .unwrap();
        assert_eq!(seen, vec!["/r", "/r/a", "/r/a/x", "/r/b", "/r/c"]);
    }

    #[test]
    fn not_found_is_detected() {
        let err = SystemError::not_found("lstat", &abs("/x"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "lstat /x: entity not found");
    }
}
