//! Include/exclude glob sets for `.chezmoiignore` and `.chezmoiremove`.
use glob::{MatchOptions, Pattern, PatternError};

use crate::path::{AbsPath, RelPath};
use crate::system::{System, SystemResult};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The outcome of matching a path against a [`PatternSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMatch {
    /// An include pattern matched and no exclude pattern did.
    Include,
    /// An exclude pattern matched.
    Exclude,
    /// Nothing matched.
    Unknown,
}

/// Glob patterns over target-relative paths. Exclude patterns win.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PatternSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not valid glob syntax.
    pub fn add(&mut self, pattern: &str, include: bool) -> Result<(), PatternError> {
        let compiled = Pattern::new(pattern)?;
        if include {
            self.include.push(compiled);
        } else {
            self.exclude.push(compiled);
        }
        Ok(())
    }

    /// Add every line of a pattern file, relative to `dir`.
    ///
    /// Blank lines and `#` comments are skipped; a leading `!` makes the
    /// pattern an exclusion. On error returns the 1-based line number and
    /// the offending pattern.
    pub fn add_lines(
        &mut self,
        dir: &RelPath,
        text: &str,
    ) -> Result<(), (usize, String, PatternError)> {
        for (index, line) in text.lines().enumerate() {
            let line = strip_comment(line).trim();
            if line.is_empty() {
                continue;
            }
            let (include, pattern) = line
                .strip_prefix('!')
                .map_or((true, line), |rest| (false, rest));
            let pattern = join_pattern(dir, pattern);
            self.add(&pattern, include)
                .map_err(|e| (index + 1, pattern, e))?;
        }
        Ok(())
    }

    /// Whether the set has no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Match `path`.
    #[must_use]
    pub fn matches(&self, path: &str) -> PatternMatch {
        if self.exclude.iter().any(|p| p.matches_with(path, MATCH_OPTIONS)) {
            PatternMatch::Exclude
        } else if self.include.iter().any(|p| p.matches_with(path, MATCH_OPTIONS)) {
            PatternMatch::Include
        } else {
            PatternMatch::Unknown
        }
    }

    /// Paths under `base` matched by an include pattern and no exclude
    /// pattern, relative to `base`, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns an error if the system cannot expand a pattern.
    pub fn glob(&self, system: &dyn System, base: &AbsPath) -> SystemResult<Vec<RelPath>> {
        let mut out = Vec::new();
        for pattern in &self.include {
            let absolute = base.join(&RelPath::new(pattern.as_str()));
            for path in system.glob(absolute.as_str())? {
                let Some(rel) = path.trim_dir_prefix(base) else {
                    continue;
                };
                if !rel.is_empty() && self.matches(rel.as_str()) == PatternMatch::Include {
                    out.push(rel);
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }
}

fn strip_comment(line: &str) -> &str {
    line.find('#').map_or(line, |i| line.get(..i).unwrap_or(""))
}

fn join_pattern(dir: &RelPath, pattern: &str) -> String {
    let pattern = pattern.trim_start_matches('/');
    if dir.is_empty() {
        pattern.to_string()
    } else {
        format!("{dir}/{pattern}")
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::system::test_helpers::MemSystem;

    fn set(text: &str) -> PatternSet {
        let mut s = PatternSet::new();
        s.add_lines(&RelPath::default(), text).unwrap();
        s
    }

    #[test]
    fn star_does_not_cross_directories() {
        let s = set("*.txt\n");
        assert_eq!(s.matches("a.txt"), PatternMatch::Include);
        assert_eq!(s.matches("dir/a.txt"), PatternMatch::Unknown);
    }

    #[test]
    fn double_star_crosses_directories() {
        let s = set("**/*.txt\n");
        assert_eq!(s.matches("dir/sub/a.txt"), PatternMatch::Include);
    }

    #[test]
    fn exclusion_wins() {
        let s = set("*.txt\n!keep.txt\n");
        assert_eq!(s.matches("drop.txt"), PatternMatch::Include);
        assert_eq!(s.matches("keep.txt"), PatternMatch::Exclude);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let s = set("# a comment\n\n  README.md  # trailing\n");
        assert_eq!(s.matches("README.md"), PatternMatch::Include);
        assert_eq!(s.matches("# a comment"), PatternMatch::Unknown);
    }

    #[test]
    fn patterns_are_relative_to_their_directory() {
        let mut s = PatternSet::new();
        s.add_lines(&RelPath::new(".config"), "cache\n").unwrap();
        assert_eq!(s.matches(".config/cache"), PatternMatch::Include);
        assert_eq!(s.matches("cache"), PatternMatch::Unknown);
    }

    #[test]
    fn invalid_pattern_reports_line() {
        let mut s = PatternSet::new();
        let (line, pattern, _) = s
            .add_lines(&RelPath::default(), "ok\n[unclosed\n")
            .unwrap_err();
        assert_eq!(line, 2);
        assert_eq!(pattern, "[unclosed");
    }

    #[test]
    fn glob_expands_against_a_directory() {
        let sys = MemSystem::new()
            .with_file("/home/user/.old", "", 0o644)
            .with_file("/home/user/.older", "", 0o644)
            .with_file("/home/user/.keep-me", "", 0o644);
        let s = set(".old*\n!.older\n");
        let base = AbsPath::new("/home/user").unwrap();
        assert_eq!(s.glob(&sys, &base).unwrap(), vec![RelPath::new(".old")]);
    }
}
