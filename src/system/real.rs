//! The [`System`] backed by the host filesystem and process table.
use std::fs;
use std::io::{self, Write as _};

use super::{DirEntry, FileInfo, FileKind, ScriptRun, System, SystemError, SystemResult};
use crate::exec::{self, Cmd, ExecError, ExecResult};
use crate::path::AbsPath;

/// Direct filesystem access with a umask applied to every created entry.
#[derive(Debug, Clone, Copy)]
pub struct RealSystem {
    umask: u32,
}

impl RealSystem {
    /// A system that masks new permissions with `umask`.
    #[must_use]
    pub const fn new(umask: u32) -> Self {
        Self { umask }
    }

    /// The configured umask.
    #[must_use]
    pub const fn umask(&self) -> u32 {
        self.umask
    }

    fn set_perm(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        set_mode(path, perm & !self.umask).map_err(|e| SystemError::io("chmod", path, e))
    }
}

impl Default for RealSystem {
    fn default() -> Self {
        Self::new(0o022)
    }
}

fn info_from(meta: &fs::Metadata) -> FileInfo {
    let ft = meta.file_type();
    let kind = if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Dir
    } else if ft.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    FileInfo {
        kind,
        mode: mode_of(meta),
        size: meta.len(),
    }
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    let base = if meta.is_dir() { 0o777 } else { 0o666 };
    if meta.permissions().readonly() {
        base & !0o222
    } else {
        base
    }
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &AbsPath, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path.as_path(), fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(path: &AbsPath, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path.as_path())?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path.as_path(), perms)
}

#[cfg(unix)]
fn set_file_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    file.set_permissions(perms)
}

#[cfg(unix)]
fn symlink(target: &str, path: &AbsPath) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path.as_path())
}

#[cfg(windows)]
fn symlink(target: &str, path: &AbsPath) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, path.as_path())
}

impl System for RealSystem {
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        fs::symlink_metadata(path.as_path())
            .map(|m| info_from(&m))
            .map_err(|e| SystemError::io("lstat", path, e))
    }

    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        fs::metadata(path.as_path())
            .map(|m| info_from(&m))
            .map_err(|e| SystemError::io("stat", path, e))
    }

    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>> {
        let err = |e| SystemError::io("readdir", path, e);
        let mut entries = Vec::new();
        for entry in fs::read_dir(path.as_path()).map_err(err)? {
            let entry = entry.map_err(err)?;
            let meta = fs::symlink_metadata(entry.path()).map_err(err)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                info: info_from(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>> {
        fs::read(path.as_path()).map_err(|e| SystemError::io("read", path, e))
    }

    fn readlink(&self, path: &AbsPath) -> SystemResult<String> {
        fs::read_link(path.as_path())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|e| SystemError::io("readlink", path, e))
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> SystemResult<()> {
        let write_err = |e: io::Error| SystemError::io("write", path, e);
        // Replace by rename: the old contents survive a failed write.
        let mut tmp = tempfile::NamedTempFile::new_in(path.parent().as_path()).map_err(write_err)?;
        tmp.write_all(data).map_err(write_err)?;
        set_file_mode(tmp.as_file(), perm & !self.umask)
            .map_err(|e| SystemError::io("chmod", path, e))?;
        tmp.persist(path.as_path())
            .map_err(|e| SystemError::io("rename", path, e.error))?;
        Ok(())
    }

    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()> {
        symlink(target, path).map_err(|e| SystemError::io("symlink", path, e))
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        fs::create_dir(path.as_path()).map_err(|e| SystemError::io("mkdir", path, e))?;
        self.set_perm(path, perm)
    }

    fn chmod(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        set_mode(path, perm).map_err(|e| SystemError::io("chmod", path, e))
    }

    fn remove(&self, path: &AbsPath) -> SystemResult<()> {
        let result = if self.lstat(path)?.is_dir() {
            fs::remove_dir(path.as_path())
        } else {
            fs::remove_file(path.as_path())
        };
        result.map_err(|e| SystemError::io("remove", path, e))
    }

    fn remove_all(&self, path: &AbsPath) -> SystemResult<()> {
        let info = match self.lstat(path) {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let result = if info.is_dir() {
            fs::remove_dir_all(path.as_path())
        } else {
            fs::remove_file(path.as_path())
        };
        result.map_err(|e| SystemError::io("remove", path, e))
    }

    fn rename(&self, from: &AbsPath, to: &AbsPath) -> SystemResult<()> {
        fs::rename(from.as_path(), to.as_path()).map_err(|e| SystemError::io("rename", from, e))
    }

    fn run_cmd(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        Ok(exec::run(cmd)?)
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        Ok(exec::run(cmd)?)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()> {
        let tmp = tempfile::Builder::new()
            .prefix("dotstate-script.")
            .tempdir()
            .map_err(|e| SystemError::io("tempdir", script.dir, e))?;
        let Some(tmp_dir) = AbsPath::new(tmp.path()) else {
            return Err(SystemError::io(
                "tempdir",
                script.dir,
                io::ErrorKind::InvalidInput.into(),
            ));
        };
        let file = tmp_dir.join_str(script.name.base());
        fs::write(file.as_path(), script.contents)
            .map_err(|e| SystemError::io("write", &file, e))?;
        set_mode(&file, 0o700).map_err(|e| SystemError::io("chmod", &file, e))?;

        // Scripts run in the destination directory when it exists.
        let dir = if self.stat(script.dir).is_ok_and(|i| i.is_dir()) {
            script.dir.clone()
        } else {
            tmp_dir
        };
        let cmd = Cmd::new(file.as_str())
            .current_dir(dir.as_path())
            .interactive();
        let result = exec::run_unchecked(&cmd)?;
        if result.success {
            Ok(())
        } else {
            Err(ExecError::Failed {
                command: script.name.to_string(),
                code: result.code.unwrap_or(-1),
                stderr: result.stderr.trim().to_string(),
            }
            .into())
        }
    }

    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>> {
        let opts = glob::MatchOptions {
            require_literal_separator: true,
            ..glob::MatchOptions::new()
        };
        let paths = glob::glob_with(pattern, opts).map_err(|e| SystemError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(paths.filter_map(Result::ok).filter_map(AbsPath::new).collect())
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::path::RelPath;

    fn root() -> (tempfile::TempDir, AbsPath) {
        let dir = tempfile::tempdir().unwrap();
        let abs = AbsPath::new(dunce::canonicalize(dir.path()).unwrap()).unwrap();
        (dir, abs)
    }

    #[test]
    fn write_file_applies_umask() {
        let (_dir, root) = root();
        let sys = RealSystem::new(0o022);
        let file = root.join_str("f");
        sys.write_file(&file, b"x", 0o666).unwrap();
        assert_eq!(sys.lstat(&file).unwrap().mode, 0o644);
        assert_eq!(sys.read_file(&file).unwrap(), b"x");
    }

    #[cfg(unix)]
    #[test]
    fn write_file_replaces_read_only_file() {
        let (_dir, root) = root();
        let sys = RealSystem::new(0o022);
        let file = root.join_str("ro");
        sys.write_file(&file, b"old", 0o444).unwrap();
        sys.write_file(&file, b"new", 0o444).unwrap();
        assert_eq!(sys.read_file(&file).unwrap(), b"new");
        assert_eq!(sys.lstat(&file).unwrap().mode & 0o777, 0o444);
    }

    #[test]
    fn write_file_leaves_no_temporary_files() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        sys.write_file(&root.join_str("f"), b"a", 0o644).unwrap();
        sys.write_file(&root.join_str("f"), b"b", 0o644).unwrap();
        let names: Vec<_> = sys
            .read_dir(&root)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["f"]);
    }

    #[test]
    fn read_dir_is_sorted_and_uses_lstat() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        sys.write_file(&root.join_str("b"), b"", 0o644).unwrap();
        sys.mkdir(&root.join_str("a"), 0o755).unwrap();
        sys.write_symlink("b", &root.join_str("c")).unwrap();
        let entries = sys.read_dir(&root).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(entries[0].info.kind, FileKind::Dir);
        assert_eq!(entries[2].info.kind, FileKind::Symlink);
        assert_eq!(sys.readlink(&root.join_str("c")).unwrap(), "b");
    }

    #[test]
    fn remove_all_ignores_missing() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        sys.remove_all(&root.join_str("missing")).unwrap();
        sys.mkdir(&root.join_str("d"), 0o755).unwrap();
        sys.write_file(&root.join_str("d/f"), b"", 0o644).unwrap();
        sys.remove_all(&root.join_str("d")).unwrap();
        assert!(sys.lstat(&root.join_str("d")).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_non_empty_dir_fails() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        sys.mkdir(&root.join_str("d"), 0o755).unwrap();
        sys.write_file(&root.join_str("d/f"), b"", 0o644).unwrap();
        assert!(sys.remove(&root.join_str("d")).is_err());
    }

    #[test]
    fn run_script_in_destination_dir() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        let name = RelPath::new("setup.sh");
        sys.run_script(&ScriptRun {
            name: &name,
            dir: &root,
            contents: b"#!/bin/sh\necho ran > marker\n",
        })
        .unwrap();
        assert_eq!(sys.read_file(&root.join_str("marker")).unwrap(), b"ran\n");
    }

    #[test]
    fn failing_script_names_the_script() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        let name = RelPath::new("fail.sh");
        let err = sys
            .run_script(&ScriptRun {
                name: &name,
                dir: &root,
                contents: b"#!/bin/sh\nexit 4\n",
            })
            .unwrap_err();
        assert!(err.to_string().starts_with("fail.sh failed (exit 4)"), "{err}");
    }

    #[test]
    fn glob_matches_entries() {
        let (_dir, root) = root();
        let sys = RealSystem::default();
        sys.write_file(&root.join_str("a.txt"), b"", 0o644).unwrap();
        sys.write_file(&root.join_str("b.md"), b"", 0o644).unwrap();
        let matches = sys.glob(&format!("{root}/*.txt")).unwrap();
        assert_eq!(matches, vec![root.join_str("a.txt")]);
    }
}
