//! What is actually present at a destination path.
use crate::entry_state::EntryState;
use crate::error::EngineError;
use crate::path::AbsPath;
use crate::system::{FileKind, System, SystemResult};

/// An observed destination entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActualStateEntry {
    /// Nothing exists.
    Absent {
        /// Destination path.
        path: AbsPath,
    },
    /// A directory.
    Dir {
        /// Destination path.
        path: AbsPath,
        /// Permission bits.
        perm: u32,
    },
    /// A regular file.
    File {
        /// Destination path.
        path: AbsPath,
        /// Permission bits.
        perm: u32,
        /// Contents.
        contents: Vec<u8>,
    },
    /// A symbolic link.
    Symlink {
        /// Destination path.
        path: AbsPath,
        /// Link target.
        linkname: String,
    },
}

impl ActualStateEntry {
    /// Inspect `path` through `system`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read or is not a file,
    /// directory or symlink.
    pub fn read(system: &dyn System, path: &AbsPath) -> Result<Self, EngineError> {
        let info = match system.lstat(path) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(Self::Absent { path: path.clone() }),
            Err(e) => return Err(e.into()),
        };
        Ok(match info.kind {
            FileKind::Dir => Self::Dir {
                path: path.clone(),
                perm: info.mode & 0o7777,
            },
            FileKind::File => Self::File {
                path: path.clone(),
                perm: info.mode & 0o7777,
                contents: system.read_file(path)?,
            },
            FileKind::Symlink => Self::Symlink {
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

    /// Destination path.
    #[must_use]
    pub const fn path(&self) -> &AbsPath {
        match self {
            Self::Absent { path }
            | Self::Dir { path, .. }
            | Self::File { path, .. }
            | Self::Symlink { path, .. } => path,
        }
    }

    /// Fingerprint of what is present.
    #[must_use]
    pub fn entry_state(&self) -> EntryState {
        match self {
            Self::Absent { .. } => EntryState::remove(),
            Self::Dir { perm, .. } => EntryState::dir(*perm),
            Self::File { perm, contents, .. } => EntryState::file(*perm, contents),
            Self::Symlink { linkname, .. } => EntryState::symlink(linkname),
        }
    }

    /// Whether nothing exists.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent { .. })
    }

    /// Remove whatever is present.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn remove(&self, system: &dyn System) -> SystemResult<()> {
        match self {
            Self::Absent { .. } => Ok(()),
            other => system.remove_all(other.path()),
        }
    }
}
