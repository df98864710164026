//! Path value types: absolute destination/source paths, target-relative
//! paths and source-relative paths.
//!
//! All three are slash-separated strings internally so that ordering and
//! joining are deterministic regardless of the host platform.
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// An absolute, normalized, slash-separated path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AbsPath(String);

impl AbsPath {
    /// Build an absolute path, normalizing `.` and `..` components.
    ///
    /// Returns `None` if `path` is not absolute.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return None;
        }
        let s = path.to_string_lossy().replace('\\', "/");
        Some(Self(normalize(&s, true)))
    }

    /// Resolve `path` against `base` when it is relative, expanding a
    /// leading `~/` to `home`.
    #[must_use]
    pub fn from_ext(path: &str, base: &Self, home: &Self) -> Self {
        if path == "~" {
            return home.clone();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return home.join(&RelPath::new(rest));
        }
        Self::new(path).unwrap_or_else(|| base.join(&RelPath::new(path)))
    }

    /// Return the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the path as a [`Path`].
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Convert to an owned [`PathBuf`].
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Join a relative path onto this one.
    #[must_use]
    pub fn join(&self, rel: &RelPath) -> Self {
        if rel.is_empty() {
            return self.clone();
        }
        if self.0 == "/" {
            return Self(format!("/{}", rel.0));
        }
        Self(format!("{}/{}", self.0, rel.0))
    }

    /// Join a single path component.
    #[must_use]
    pub fn join_str(&self, name: &str) -> Self {
        self.join(&RelPath::new(name))
    }

    /// Return the parent directory, or `self` for the root.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(0) | None => Self("/".to_string()),
            Some(i) => Self(self.0.get(..i).unwrap_or("/").to_string()),
        }
    }

    /// Return the final path component.
    #[must_use]
    pub fn base(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Strip `dir` from the front of this path, returning the remainder.
    #[must_use]
    pub fn trim_dir_prefix(&self, dir: &Self) -> Option<RelPath> {
        if self == dir {
            return Some(RelPath::default());
        }
        let prefix = if dir.0 == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir.0)
        };
        self.0.strip_prefix(&prefix).map(RelPath::new)
    }
}

impl fmt::Display for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized, slash-separated path relative to some root. The empty
/// path denotes the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RelPath(String);

impl RelPath {
    /// Build a relative path, normalizing separators and dropping empty
    /// and `.` components.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self(normalize(&path.replace('\\', "/"), false))
    }

    /// Return the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Join another relative path.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}/{}", self.0, other.0)),
        }
    }

    /// Join a single component.
    #[must_use]
    pub fn join_str(&self, name: &str) -> Self {
        self.join(&Self::new(name))
    }

    /// Return the parent path (empty for top-level entries).
    #[must_use]
    pub fn parent(&self) -> Self {
        self.0
            .rfind('/')
            .map_or_else(Self::default, |i| Self(self.0.get(..i).unwrap_or("").to_string()))
    }

    /// Return the final component.
    #[must_use]
    pub fn base(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Iterate over the path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Whether `self` is `dir` or lies beneath it.
    #[must_use]
    pub fn has_dir_prefix(&self, dir: &Self) -> bool {
        dir.is_empty() || self == dir || self.0.starts_with(&format!("{}/", dir.0))
    }

    /// All proper ancestors, outermost first (excluding the root).
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while !current.is_empty() {
            out.push(current.clone());
            current = current.parent();
        }
        out.reverse();
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A path relative to the source directory, remembering whether it names a
/// directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRelPath {
    rel: RelPath,
    is_dir: bool,
}

impl SourceRelPath {
    /// A source-relative directory path.
    #[must_use]
    pub fn dir(rel: RelPath) -> Self {
        Self { rel, is_dir: true }
    }

    /// A source-relative file path.
    #[must_use]
    pub fn file(rel: RelPath) -> Self {
        Self { rel, is_dir: false }
    }

    /// Whether this path names a directory.
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// The underlying relative path.
    #[must_use]
    pub const fn rel_path(&self) -> &RelPath {
        &self.rel
    }

    /// Join a child, which may itself be a file or directory.
    #[must_use]
    pub fn join(&self, child: &Self) -> Self {
        Self {
            rel: self.rel.join(&child.rel),
            is_dir: child.is_dir,
        }
    }

    /// Split into the parent directory and the final component.
    #[must_use]
    pub fn split(&self) -> (Self, Self) {
        let parent = Self::dir(self.rel.parent());
        let base = Self {
            rel: RelPath::new(self.rel.base()),
            is_dir: self.is_dir,
        };
        (parent, base)
    }
}

impl fmt::Display for SourceRelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.rel, f)
    }
}

fn normalize(s: &str, absolute: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in s.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            c => parts.push(c),
        }
    }
    let joined = parts.join("/");
    if absolute && s.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn abs_path_normalizes_components() {
        let p = AbsPath::new("/home/user/./dir/../file").unwrap();
        assert_eq!(p.as_str(), "/home/user/file");
    }

    #[test]
    fn abs_path_rejects_relative() {
        assert!(AbsPath::new("relative/path").is_none());
    }

    #[test]
    fn abs_path_join_and_trim() {
        let home = AbsPath::new("/home/user").unwrap();
        let p = home.join(&RelPath::new(".config/nvim"));
        assert_eq!(p.as_str(), "/home/user/.config/nvim");
        assert_eq!(
            p.trim_dir_prefix(&home),
            Some(RelPath::new(".config/nvim"))
        );
        assert_eq!(home.trim_dir_prefix(&home), Some(RelPath::default()));
        let other = AbsPath::new("/home/username").unwrap();
        assert_eq!(other.trim_dir_prefix(&home), None);
    }

    #[test]
    fn abs_path_parent_and_base() {
        let p = AbsPath::new("/a/b/c").unwrap();
        assert_eq!(p.parent().as_str(), "/a/b");
        assert_eq!(p.base(), "c");
        assert_eq!(AbsPath::new("/a").unwrap().parent().as_str(), "/");
    }

    #[test]
    fn abs_path_from_ext_expands_tilde() {
        let home = AbsPath::new("/home/user").unwrap();
        let cwd = AbsPath::new("/work").unwrap();
        assert_eq!(
            AbsPath::from_ext("~/.bashrc", &cwd, &home).as_str(),
            "/home/user/.bashrc"
        );
        assert_eq!(AbsPath::from_ext("x", &cwd, &home).as_str(), "/work/x");
        assert_eq!(AbsPath::from_ext("/etc/x", &cwd, &home).as_str(), "/etc/x");
    }

    #[test]
    fn rel_path_parent_base_depth() {
        let p = RelPath::new("a/b/c");
        assert_eq!(p.parent(), RelPath::new("a/b"));
        assert_eq!(p.base(), "c");
        assert_eq!(p.depth(), 3);
        assert_eq!(RelPath::new("a").parent(), RelPath::default());
    }

    #[test]
    fn rel_path_dir_prefix() {
        let p = RelPath::new(".config/nvim/init.lua");
        assert!(p.has_dir_prefix(&RelPath::new(".config")));
        assert!(!p.has_dir_prefix(&RelPath::new(".conf")));
        assert!(p.has_dir_prefix(&RelPath::default()));
    }

    #[test]
    fn rel_path_ancestors_outermost_first() {
        let p = RelPath::new("a/b/c");
        assert_eq!(p.ancestors(), vec![RelPath::new("a"), RelPath::new("a/b")]);
    }

    #[test]
    fn source_rel_path_split() {
        let p = SourceRelPath::file(RelPath::new("dot_config/private_file"));
        let (parent, base) = p.split();
        assert!(parent.is_dir());
        assert_eq!(parent.rel_path().as_str(), "dot_config");
        assert_eq!(base.rel_path().as_str(), "private_file");
        assert!(!base.is_dir());
    }
}
