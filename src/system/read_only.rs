//! A decorator that rejects every mutation.
use super::{DirEntry, FileInfo, ScriptRun, System, SystemError, SystemResult};
use crate::exec::{Cmd, ExecResult};
use crate::path::AbsPath;

/// Forwards reads and fails every write with [`SystemError::ReadOnly`].
///
/// Installed outermost so that read-only commands fail on a write attempt
/// even when a dry-run layer sits beneath.
#[derive(Debug)]
pub struct ReadOnlySystem {
    inner: Box<dyn System>,
}

impl ReadOnlySystem {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self { inner }
    }
}

fn denied<T>(op: &'static str, path: impl ToString) -> SystemResult<T> {
    Err(SystemError::ReadOnly {
        op,
        path: path.to_string(),
    })
}

impl System for ReadOnlySystem {
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        self.inner.lstat(path)
    }

    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        self.inner.stat(path)
    }

    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>> {
        self.inner.read_dir(path)
    }

    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn readlink(&self, path: &AbsPath) -> SystemResult<String> {
        self.inner.readlink(path)
    }

    fn write_file(&self, path: &AbsPath, _data: &[u8], _perm: u32) -> SystemResult<()> {
        denied("write", path)
    }

    fn write_symlink(&self, _target: &str, path: &AbsPath) -> SystemResult<()> {
        denied("symlink", path)
    }

    fn mkdir(&self, path: &AbsPath, _perm: u32) -> SystemResult<()> {
        denied("mkdir", path)
    }

    fn chmod(&self, path: &AbsPath, _perm: u32) -> SystemResult<()> {
        denied("chmod", path)
    }

    fn remove(&self, path: &AbsPath) -> SystemResult<()> {
        denied("remove", path)
    }

    fn remove_all(&self, path: &AbsPath) -> SystemResult<()> {
        denied("remove", path)
    }

    fn rename(&self, from: &AbsPath, _to: &AbsPath) -> SystemResult<()> {
        denied("rename", from)
    }

    fn run_cmd(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        denied("run", cmd)
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        self.inner.idempotent_cmd_output(cmd)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()> {
        denied("run", script.name)
    }

    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>> {
        self.inner.glob(pattern)
    }
}
