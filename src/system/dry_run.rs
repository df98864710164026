//! A decorator that lets reads through and swallows every mutation.
use std::sync::atomic::{AtomicBool, Ordering};

use super::{DirEntry, FileInfo, ScriptRun, System, SystemResult};
use crate::exec::{Cmd, ExecResult};
use crate::path::AbsPath;

/// Passes reads to the inner system and records, without performing, any
/// write.
#[derive(Debug)]
pub struct DryRunSystem {
    inner: Box<dyn System>,
    modified: AtomicBool,
}

impl DryRunSystem {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self {
            inner,
            modified: AtomicBool::new(false),
        }
    }

    /// Whether any mutation was attempted.
    #[must_use]
    pub fn modified(&self) -> bool {
        self.modified.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.modified.store(true, Ordering::Relaxed);
    }
}

impl System for DryRunSystem {
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

    fn write_file(&self, _path: &AbsPath, _data: &[u8], _perm: u32) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn write_symlink(&self, _target: &str, _path: &AbsPath) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn mkdir(&self, _path: &AbsPath, _perm: u32) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn chmod(&self, _path: &AbsPath, _perm: u32) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn remove(&self, _path: &AbsPath) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn remove_all(&self, _path: &AbsPath) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn rename(&self, _from: &AbsPath, _to: &AbsPath) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn run_cmd(&self, _cmd: &Cmd) -> SystemResult<ExecResult> {
        self.touch();
        Ok(ExecResult {
            success: true,
            code: Some(0),
            ..ExecResult::default()
        })
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        self.inner.idempotent_cmd_output(cmd)
    }

    fn run_script(&self, _script: &ScriptRun<'_>) -> SystemResult<()> {
        self.touch();
        Ok(())
    }

    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>> {
        self.inner.glob(pattern)
    }
}
