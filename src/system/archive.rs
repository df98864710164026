//! A [`System`] that streams the target state into a tar archive.
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use flate2::Compression;
use flate2::write::GzEncoder;

use super::{DirEntry, FileInfo, ScriptRun, System, SystemError, SystemResult};
use crate::exec::{self, Cmd, ExecResult};
use crate::path::AbsPath;

/// Archive container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ArchiveFormat {
    /// Plain tar.
    #[default]
    Tar,
    /// Gzip-compressed tar.
    TarGz,
}

impl ArchiveFormat {
    /// Guess a format from an output file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

type Builder = tar::Builder<Box<dyn Write + Send>>;

/// Every read sees an empty filesystem, so applying into this system
/// writes the whole target state. Entry names are relative to `dir`.
pub struct TarWriterSystem {
    dir: AbsPath,
    builder: Mutex<Option<Builder>>,
    mtime: u64,
}

impl fmt::Debug for TarWriterSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarWriterSystem")
            .field("dir", &self.dir)
            .field("mtime", &self.mtime)
            .finish_non_exhaustive()
    }
}

impl TarWriterSystem {
    /// Start an archive on `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>, format: ArchiveFormat, dir: AbsPath) -> Self {
        let writer: Box<dyn Write + Send> = match format {
            ArchiveFormat::Tar => writer,
            ArchiveFormat::TarGz => Box::new(GzEncoder::new(writer, Compression::default())),
        };
        let mtime = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self {
            dir,
            builder: Mutex::new(Some(tar::Builder::new(writer))),
            mtime,
        }
    }

    /// Write the archive trailer and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the trailer cannot be written.
    pub fn finish(&self) -> SystemResult<()> {
        let builder = self
            .builder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(builder) = builder {
            let archive_err = |source| SystemError::Archive {
                path: self.dir.to_string(),
                source,
            };
            let mut writer = builder.into_inner().map_err(archive_err)?;
            writer.flush().map_err(archive_err)?;
        }
        Ok(())
    }

    fn name(&self, path: &AbsPath) -> String {
        path.trim_dir_prefix(&self.dir)
            .map_or_else(|| path.as_str().trim_start_matches('/').to_string(), |r| r.to_string())
    }

    fn header(&self, kind: tar::EntryType, mode: u32, size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(self.mtime);
        header.set_cksum();
        header
    }

    fn append(
        &self,
        name: &str,
        f: impl FnOnce(&mut Builder) -> std::io::Result<()>,
    ) -> SystemResult<()> {
        let mut guard = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
        let builder = guard.as_mut().ok_or_else(|| SystemError::Archive {
            path: name.to_string(),
            source: std::io::Error::other("archive already finished"),
        })?;
        f(builder).map_err(|source| SystemError::Archive {
            path: name.to_string(),
            source,
        })
    }

    fn append_file(&self, name: &str, data: &[u8], perm: u32) -> SystemResult<()> {
        let mut header = self.header(tar::EntryType::Regular, perm, data.len() as u64);
        self.append(name, |b| b.append_data(&mut header, name, data))
    }
}

impl System for TarWriterSystem {
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        Err(SystemError::not_found("lstat", path))
    }

    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        Err(SystemError::not_found("stat", path))
    }

    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>> {
        Err(SystemError::not_found("readdir", path))
    }

    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>> {
        Err(SystemError::not_found("read", path))
    }

    fn readlink(&self, path: &AbsPath) -> SystemResult<String> {
        Err(SystemError::not_found("readlink", path))
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> SystemResult<()> {
        self.append_file(&self.name(path), data, perm)
    }

    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()> {
        let name = self.name(path);
        let mut header = self.header(tar::EntryType::Symlink, 0o777, 0);
        self.append(&name, |b| b.append_link(&mut header, &name, target))
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let name = format!("{}/", self.name(path));
        let mut header = self.header(tar::EntryType::Directory, perm, 0);
        self.append(&name, |b| b.append_data(&mut header, &name, std::io::empty()))
    }

    fn chmod(&self, _path: &AbsPath, _perm: u32) -> SystemResult<()> {
        Ok(())
    }

    fn remove(&self, _path: &AbsPath) -> SystemResult<()> {
        Ok(())
    }

    fn remove_all(&self, _path: &AbsPath) -> SystemResult<()> {
        Ok(())
    }

    fn rename(&self, _from: &AbsPath, _to: &AbsPath) -> SystemResult<()> {
        Ok(())
    }

    fn run_cmd(&self, _cmd: &Cmd) -> SystemResult<ExecResult> {
        Ok(ExecResult {
            success: true,
            code: Some(0),
            ..ExecResult::default()
        })
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        Ok(exec::run(cmd)?)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()> {
        self.append_file(script.name.as_str(), script.contents, 0o700)
    }

    fn glob(&self, _pattern: &str) -> SystemResult<Vec<AbsPath>> {
        Ok(Vec::new())
    }
}
