//! A [`System`] that records the target state as serializable data.
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use super::{DirEntry, FileInfo, ScriptRun, System, SystemError, SystemResult};
use crate::exec::{self, Cmd, ExecResult};
use crate::path::AbsPath;

/// One recorded entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DumpEntry {
    /// A directory.
    Dir {
        /// Target-relative name.
        name: String,
        /// Permission bits.
        perm: u32,
    },
    /// A regular file.
    File {
        /// Target-relative name.
        name: String,
        /// Contents, lossily decoded.
        contents: String,
        /// Permission bits.
        perm: u32,
    },
    /// A script that would run.
    Script {
        /// Target-relative name.
        name: String,
        /// Contents, lossily decoded.
        contents: String,
    },
    /// A symbolic link.
    Symlink {
        /// Target-relative name.
        name: String,
        /// Link target.
        linkname: String,
    },
}

/// Every read sees an empty filesystem; writes are recorded by name.
#[derive(Debug)]
pub struct DumpSystem {
    dir: AbsPath,
    data: Mutex<BTreeMap<String, DumpEntry>>,
}

impl DumpSystem {
    /// Record entries relative to `dir`.
    #[must_use]
    pub fn new(dir: AbsPath) -> Self {
        Self {
            dir,
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Everything recorded so far, keyed by name.
    #[must_use]
    pub fn data(&self) -> BTreeMap<String, DumpEntry> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn name(&self, path: &AbsPath) -> String {
        path.trim_dir_prefix(&self.dir)
            .map_or_else(|| path.to_string(), |r| r.to_string())
    }

    fn record(&self, path: &AbsPath, name: String, entry: DumpEntry) -> SystemResult<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if data.contains_key(&name) {
            return Err(SystemError::io(
                "dump",
                path,
                std::io::ErrorKind::AlreadyExists.into(),
            ));
        }
        data.insert(name, entry);
        Ok(())
    }
}

impl System for DumpSystem {
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
        let name = self.name(path);
        let entry = DumpEntry::File {
            name: name.clone(),
            contents: String::from_utf8_lossy(data).into_owned(),
            perm,
        };
        self.record(path, name, entry)
    }

    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()> {
        let name = self.name(path);
        let entry = DumpEntry::Symlink {
            name: name.clone(),
            linkname: target.to_string(),
        };
        self.record(path, name, entry)
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let name = self.name(path);
        let entry = DumpEntry::Dir {
            name: name.clone(),
            perm,
        };
        self.record(path, name, entry)
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
        let name = script.name.to_string();
        let entry = DumpEntry::Script {
            name: name.clone(),
            contents: String::from_utf8_lossy(script.contents).into_owned(),
        };
        self.record(script.dir, name, entry)
    }

    fn glob(&self, _pattern: &str) -> SystemResult<Vec<AbsPath>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn records_entries_as_json() {
        let home = AbsPath::new("/home/user").unwrap();
        let sys = DumpSystem::new(home.clone());
        sys.mkdir(&home.join_str(".config"), 0o755).unwrap();
        sys.write_file(&home.join_str(".bashrc"), b"# rc\n", 0o644).unwrap();
        sys.write_symlink("x", &home.join_str(".link")).unwrap();

        let json = serde_json::to_string(&sys.data()).unwrap();
        insta::assert_snapshot!(json, @r###"{".bashrc":{"type":"file","name":".bashrc","contents":"# rc\n","perm":420},".config":{"type":"dir","name":".config","perm":493},".link":{"type":"symlink","name":".link","linkname":"x"}}"###);
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let home = AbsPath::new("/home/user").unwrap();
        let sys = DumpSystem::new(home.clone());
        sys.write_file(&home.join_str("f"), b"", 0o644).unwrap();
        assert!(sys.write_file(&home.join_str("f"), b"", 0o644).is_err());
    }
}
