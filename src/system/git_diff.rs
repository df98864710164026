//! A decorator that renders every mutation as a git-style diff.
use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use similar::TextDiff;

use super::{DirEntry, FileInfo, FileKind, ScriptRun, System, SystemError, SystemResult};
use crate::exec::{Cmd, ExecResult};
use crate::path::AbsPath;

const MODE_DIR: &str = "040000";
const MODE_FILE: &str = "100644";
const MODE_EXECUTABLE: &str = "100755";
const MODE_SYMLINK: &str = "120000";
const DEV_NULL: &str = "/dev/null";

/// Writes a diff for each mutation to a writer, then delegates it.
///
/// Removed paths are remembered so that, when the inner system is a
/// dry-run, later reads see them as absent.
pub struct GitDiffSystem {
    inner: Box<dyn System>,
    dir: AbsPath,
    writer: Mutex<Box<dyn Write + Send>>,
    removed: Mutex<HashSet<AbsPath>>,
}

impl fmt::Debug for GitDiffSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitDiffSystem")
            .field("inner", &self.inner)
            .field("dir", &self.dir)
            .field("writer", &"<dyn Write>")
            .finish_non_exhaustive()
    }
}

/// Render a unified diff of `from` to `to` with `a/`- and `b/`-style
/// headers. Returns an empty string when the texts are equal.
#[must_use]
pub fn unified_diff(from_name: &str, to_name: &str, from: &str, to: &str) -> String {
    if from == to {
        return String::new();
    }
    TextDiff::from_lines(from, to)
        .unified_diff()
        .context_radius(3)
        .header(from_name, to_name)
        .to_string()
}

fn git_mode(info: &FileInfo) -> &'static str {
    match info.kind {
        FileKind::Dir => MODE_DIR,
        FileKind::Symlink => MODE_SYMLINK,
        FileKind::File | FileKind::Other => file_mode(info.mode),
    }
}

const fn file_mode(perm: u32) -> &'static str {
    if perm & 0o111 == 0 {
        MODE_FILE
    } else {
        MODE_EXECUTABLE
    }
}

fn is_binary(data: &[u8]) -> bool {
    data.contains(&0) || std::str::from_utf8(data).is_err()
}

impl GitDiffSystem {
    /// Wrap `inner`, rendering paths relative to `dir` onto `writer`.
    #[must_use]
    pub fn new(inner: Box<dyn System>, writer: Box<dyn Write + Send>, dir: AbsPath) -> Self {
        Self {
            inner,
            dir,
            writer: Mutex::new(writer),
            removed: Mutex::new(HashSet::new()),
        }
    }

    fn rel(&self, path: &AbsPath) -> String {
        path.trim_dir_prefix(&self.dir)
            .map_or_else(|| path.to_string(), |r| r.to_string())
    }

    fn is_removed(&self, path: &AbsPath) -> bool {
        let removed = self.removed.lock().unwrap_or_else(PoisonError::into_inner);
        if removed.is_empty() {
            return false;
        }
        let mut current = path.clone();
        loop {
            if removed.contains(&current) {
                return true;
            }
            let parent = current.parent();
            if parent == current {
                return false;
            }
            current = parent;
        }
    }

    fn mark_removed(&self, path: &AbsPath, removed: bool) {
        let mut set = self.removed.lock().unwrap_or_else(PoisonError::into_inner);
        if removed {
            set.insert(path.clone());
        } else {
            set.remove(path);
        }
    }

    fn existing(&self, path: &AbsPath) -> SystemResult<Option<FileInfo>> {
        match self.lstat(path) {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn emit(&self, path: &AbsPath, text: &str) -> SystemResult<()> {
        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        w.write_all(text.as_bytes())
            .and_then(|()| w.flush())
            .map_err(|e| SystemError::io("diff", path, e))
    }

    /// Build a file patch for `rel` going from `from` to `to`, each an
    /// optional (mode, contents) pair.
    fn file_patch(
        rel: &str,
        from: Option<(&str, &[u8])>,
        to: Option<(&str, &[u8])>,
    ) -> String {
        let mut out = format!("diff --git a/{rel} b/{rel}\n");
        let a = format!("a/{rel}");
        let b = format!("b/{rel}");
        let (from_name, from_data) = match from {
            Some((_, data)) => (a.as_str(), data),
            None => (DEV_NULL, &[][..]),
        };
        let (to_name, to_data) = match to {
            Some((_, data)) => (b.as_str(), data),
            None => (DEV_NULL, &[][..]),
        };
        match (from, to) {
            (None, Some((mode, _))) => out.push_str(&format!("new file mode {mode}\n")),
            (Some((mode, _)), None) => out.push_str(&format!("deleted file mode {mode}\n")),
            (Some((old, _)), Some((new, _))) if old != new => {
                out.push_str(&format!("old mode {old}\nnew mode {new}\n"));
            }
            _ => {}
        }
        if is_binary(from_data) || is_binary(to_data) {
            if from_data != to_data {
                out.push_str(&format!("Binary files {from_name} and {to_name} differ\n"));
            }
        } else {
            out.push_str(&unified_diff(
                from_name,
                to_name,
                &String::from_utf8_lossy(from_data),
                &String::from_utf8_lossy(to_data),
            ));
        }
        out
    }

    fn contents_of(&self, path: &AbsPath, info: &FileInfo) -> SystemResult<Vec<u8>> {
        match info.kind {
            FileKind::File => self.inner.read_file(path),
            FileKind::Symlink => Ok(self.inner.readlink(path)?.into_bytes()),
            FileKind::Dir | FileKind::Other => Ok(Vec::new()),
        }
    }

    fn emit_removal(&self, path: &AbsPath) -> SystemResult<()> {
        let Some(info) = self.existing(path)? else {
            return Ok(());
        };
        let data = self.contents_of(path, &info)?;
        let patch = Self::file_patch(&self.rel(path), Some((git_mode(&info), &data)), None);
        self.emit(path, &patch)
    }
}

impl System for GitDiffSystem {
    fn lstat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        if self.is_removed(path) {
            return Err(SystemError::not_found("lstat", path));
        }
        self.inner.lstat(path)
    }

    fn stat(&self, path: &AbsPath) -> SystemResult<FileInfo> {
        if self.is_removed(path) {
            return Err(SystemError::not_found("stat", path));
        }
        self.inner.stat(path)
    }

    fn read_dir(&self, path: &AbsPath) -> SystemResult<Vec<DirEntry>> {
        if self.is_removed(path) {
            return Err(SystemError::not_found("readdir", path));
        }
        let entries = self.inner.read_dir(path)?;
        Ok(entries
            .into_iter()
            .filter(|e| !self.is_removed(&path.join_str(&e.name)))
            .collect())
    }

    fn read_file(&self, path: &AbsPath) -> SystemResult<Vec<u8>> {
        if self.is_removed(path) {
            return Err(SystemError::not_found("read", path));
        }
        self.inner.read_file(path)
    }

    fn readlink(&self, path: &AbsPath) -> SystemResult<String> {
        if self.is_removed(path) {
            return Err(SystemError::not_found("readlink", path));
        }
        self.inner.readlink(path)
    }

    fn write_file(&self, path: &AbsPath, data: &[u8], perm: u32) -> SystemResult<()> {
        let from = match self.existing(path)? {
            Some(info) if info.kind == FileKind::File => {
                Some((git_mode(&info), self.inner.read_file(path)?))
            }
            _ => None,
        };
        let patch = Self::file_patch(
            &self.rel(path),
            from.as_ref().map(|(m, d)| (*m, d.as_slice())),
            Some((file_mode(perm), data)),
        );
        self.emit(path, &patch)?;
        self.mark_removed(path, false);
        self.inner.write_file(path, data, perm)
    }

    fn write_symlink(&self, target: &str, path: &AbsPath) -> SystemResult<()> {
        let from = match self.existing(path)? {
            Some(info) if info.kind == FileKind::Symlink => Some(self.inner.readlink(path)?),
            _ => None,
        };
        let patch = Self::file_patch(
            &self.rel(path),
            from.as_deref().map(|old| (MODE_SYMLINK, old.as_bytes())),
            Some((MODE_SYMLINK, target.as_bytes())),
        );
        self.emit(path, &patch)?;
        self.mark_removed(path, false);
        self.inner.write_symlink(target, path)
    }

    fn mkdir(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let rel = self.rel(path);
        self.emit(
            path,
            &format!("diff --git a/{rel} b/{rel}\nnew file mode {MODE_DIR}\n"),
        )?;
        self.mark_removed(path, false);
        self.inner.mkdir(path, perm)
    }

    fn chmod(&self, path: &AbsPath, perm: u32) -> SystemResult<()> {
        let info = self.lstat(path)?;
        let from = git_mode(&info);
        let to = git_mode(&FileInfo { mode: perm, ..info });
        if from != to {
            let rel = self.rel(path);
            self.emit(
                path,
                &format!("diff --git a/{rel} b/{rel}\nold mode {from}\nnew mode {to}\n"),
            )?;
        }
        self.inner.chmod(path, perm)
    }

    fn remove(&self, path: &AbsPath) -> SystemResult<()> {
        self.emit_removal(path)?;
        self.inner.remove(path)?;
        self.mark_removed(path, true);
        Ok(())
    }

    fn remove_all(&self, path: &AbsPath) -> SystemResult<()> {
        self.emit_removal(path)?;
        self.inner.remove_all(path)?;
        self.mark_removed(path, true);
        Ok(())
    }

    fn rename(&self, from: &AbsPath, to: &AbsPath) -> SystemResult<()> {
        let (a, b) = (self.rel(from), self.rel(to));
        self.emit(
            from,
            &format!("diff --git a/{a} b/{b}\nrename from {a}\nrename to {b}\n"),
        )?;
        self.inner.rename(from, to)?;
        self.mark_removed(from, true);
        self.mark_removed(to, false);
        Ok(())
    }

    fn run_cmd(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        self.inner.run_cmd(cmd)
    }

    fn idempotent_cmd_output(&self, cmd: &Cmd) -> SystemResult<ExecResult> {
        self.inner.idempotent_cmd_output(cmd)
    }

    fn run_script(&self, script: &ScriptRun<'_>) -> SystemResult<()> {
        let patch = Self::file_patch(
            script.name.as_str(),
            None,
            Some((MODE_EXECUTABLE, script.contents)),
        );
        self.emit(script.dir, &patch)?;
        self.inner.run_script(script)
    }

    fn glob(&self, pattern: &str) -> SystemResult<Vec<AbsPath>> {
        Ok(self
            .inner
            .glob(pattern)?
            .into_iter()
            .filter(|p| !self.is_removed(p))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::path::RelPath;
    use crate::system::DryRunSystem;
    use crate::system::test_helpers::MemSystem;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn diff_system(mem: MemSystem) -> (GitDiffSystem, SharedBuf) {
        let buf = SharedBuf::default();
        let sys = GitDiffSystem::new(
            Box::new(DryRunSystem::new(Box::new(mem))),
            Box::new(buf.clone()),
            AbsPath::new("/home/user").unwrap(),
        );
        (sys, buf)
    }

    fn abs(p: &str) -> AbsPath {
        AbsPath::new(p).unwrap()
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    #[test]
    fn new_file_renders_additions() {
        let (sys, buf) = diff_system(MemSystem::new().with_dir("/home/user", 0o755));
        sys.write_file(&abs("/home/user/.bashrc"), b"export A=1\n", 0o644)
            .unwrap();
        insta::assert_snapshot!(buf.text(), @r"
        diff --git a/.bashrc b/.bashrc
        new file mode 100644
        --- /dev/null
        +++ b/.bashrc
        @@ -0,0 +1 @@
        +export A=1
        ");
    }

    #[test]
    fn modified_file_renders_hunk_and_mode_change() {
        let (sys, buf) = diff_system(MemSystem::new().with_file("/home/user/run", "a\nb\n", 0o644));
        sys.write_file(&abs("/home/user/run"), b"a\nc\n", 0o755).unwrap();
        insta::assert_snapshot!(buf.text(), @r"
        diff --git a/run b/run
        old mode 100644
        new mode 100755
        --- a/run
        +++ b/run
        @@ -1,2 +1,2 @@
         a
        -b
        +c
        ");
    }

    #[test]
    fn removal_hides_entry_from_later_reads() {
        let (sys, buf) = diff_system(MemSystem::new().with_file("/home/user/old", "x\n", 0o644));
        sys.remove_all(&abs("/home/user/old")).unwrap();
        assert!(buf.text().contains("deleted file mode 100644"));
        assert!(sys.lstat(&abs("/home/user/old")).unwrap_err().is_not_found());
        assert!(sys.read_dir(&abs("/home/user")).unwrap().is_empty());
    }

    #[test]
    fn chmod_without_kind_change_is_silent() {
        let (sys, buf) = diff_system(MemSystem::new().with_file("/home/user/f", "", 0o644));
        sys.chmod(&abs("/home/user/f"), 0o600).unwrap();
        assert_eq!(buf.text(), "");
    }

    // ------------------------------------------------------------------
    // Symlinks and scripts
    // ------------------------------------------------------------------

    #[test]
    fn symlink_change_renders_old_and_new_target() {
        let (sys, buf) =
            diff_system(MemSystem::new().with_symlink("/home/user/.link", "old-target"));
        sys.write_symlink("new-target", &abs("/home/user/.link")).unwrap();
        let text = buf.text();
        assert!(text.contains("-old-target"), "{text}");
        assert!(text.contains("+new-target"), "{text}");
    }

    #[test]
    fn script_renders_as_new_executable_file() {
        let (sys, buf) = diff_system(MemSystem::new().with_dir("/home/user", 0o755));
        let name = RelPath::new("install.sh");
        sys.run_script(&ScriptRun {
            name: &name,
            dir: &abs("/home/user"),
            contents: b"#!/bin/sh\necho hi\n",
        })
        .unwrap();
        let text = buf.text();
        assert!(text.contains("new file mode 100755"), "{text}");
        assert!(text.contains("+echo hi"), "{text}");
    }

    #[test]
    fn unified_diff_of_equal_text_is_empty() {
        assert_eq!(unified_diff("a/x", "b/x", "same\n", "same\n"), "");
    }
}
