//! A pass-through decorator that traces every call.
use super::{DirEntry, FileInfo, ScriptRun, System, SystemResult};
use crate::exec::{Cmd, ExecResult};
use crate::path::AbsPath;

/// Logs each call and its outcome at debug level, then delegates.
#[derive(Debug)]
pub struct DebugSystem {
    inner: Box<dyn System>,
}

impl DebugSystem {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Box<dyn System>) -> Self {
        Self { inner }
    }
}

fn traced<T>(op: &str, subject: &dyn std::fmt::Display, result: SystemResult<T>) -> SystemResult<T> {
    match &result {
        Ok(_) => tracing::debug!(target: "dotstate::system", "{op} {subject}"),
        Err(e) => tracing::debug!(target: "dotstate::system", "{op} {subject}: {e}"),
    }
    result
}

impl System for DebugSystem {
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        traced("lstat", path, self.inner.lstat(path))
    }

    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        traced("stat", path, self.inner.stat(path))
    }

    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>> {
        traced("readdir", path, self.inner.read_dir(path))
    }

    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>> {
        traced("read", path, self.inner.read_file(path))
    }

    fn readlink(&self, path: &AbsPath) -> SystemResult<String> {
        traced("readlink", path, self.inner.readlink(path))
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> SystemResult<()> {
        let subject = format!("{path} ({} bytes, {perm:04o})", data.len());
        traced("write", &subject, self.inner.write_file(path, data, perm))
    }

    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()> {
        let subject = format!("{path} -> {target}");
        traced("symlink", &subject, self.inner.write_symlink(target, path))
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let subject = format!("{path} ({perm:04o})");
        traced("mkdir", &subject, self.inner.mkdir(path, perm))
    }

    fn chmod(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let subject = format!("{path} ({perm:04o})");
        traced("chmod", &subject, self.inner.chmod(path, perm))
    }

    fn remove(&self, path: &AbsPath) -> SystemResult<()> {
        traced("remove", path, self.inner.remove(path))
    }

    fn remove_all(&self, path: &AbsPath) -> SystemResult<()> {
        traced("remove-all", path, self.inner.remove_all(path))
    }

    fn rename(&self, from: &AbsPath, to: &AbsPath) -> SystemResult<()> {
        let subject = format!("{from} -> {to}");
        traced("rename", &subject, self.inner.rename(from, to))
    }

    fn run_cmd(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        traced("run", cmd, self.inner.run_cmd(cmd))
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        traced("output", cmd, self.inner.idempotent_cmd_output(cmd))
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()> {
        traced("script", script.name, self.inner.run_script(script))
    }

    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>> {
        traced("glob", &pattern, self.inner.glob(pattern))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::system::test_helpers::MemSystem;

    #[test]
    fn delegates_reads_and_writes() {
        let sys = DebugSystem::new(Box::new(MemSystem::new().with_dir("/h", 0o755)));
        let f = AbsPath::new("/h/f").unwrap();
        sys.write_file(&f, b"data", 0o644).unwrap();
        assert_eq!(sys.read_file(&f).unwrap(), b"data");
        assert!(sys.lstat(&AbsPath::new("/h/missing").unwrap()).is_err());
    }
}
