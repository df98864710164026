//! The source state: every managed entry, keyed by target path.
//!
//! A [`SourceState`] is read fresh for each command and never changes
//! afterwards, except that target entries are computed lazily and cached
//! on first use.
mod entry;
mod patterns;
mod read;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::encryption::Encryption;
use crate::error::{EngineError, EngineResult};
use crate::path::{AbsPath, RelPath};
use crate::system::{FileInfo, System};
use crate::template::TemplateEngine;

pub use entry::{
    SourceContents, SourceStateDir, SourceStateEntry, SourceStateFile, SourceStateRemove,
    TargetContext,
};
pub use patterns::{PatternMatch, PatternSet};

/// Name prefix reserved for special source entries.
pub const SPECIAL_PREFIX: &str = ".chezmoi";
/// Data files merged into the template data.
pub const DATA_NAME: &str = ".chezmoidata";
/// Ignore patterns.
pub const IGNORE_NAME: &str = ".chezmoiignore";
/// Remove patterns.
pub const REMOVE_NAME: &str = ".chezmoiremove";
/// Directory of scripts not tied to a target directory.
pub const SCRIPTS_DIR_NAME: &str = ".chezmoiscripts";
/// Directory of named templates.
pub const TEMPLATES_DIR_NAME: &str = ".chezmoitemplates";
/// Minimum version file.
pub const VERSION_NAME: &str = ".chezmoiversion";
/// File that keeps an otherwise empty directory in the source state.
pub const KEEP_NAME: &str = ".keep";
/// Templates the config file is generated from, in lookup order.
pub const CONFIG_TEMPLATE_NAMES: &[&str] = &[".chezmoi.toml.tmpl", ".chezmoi.json.tmpl"];

/// Inputs for [`SourceState::read`].
#[derive(Debug, Clone)]
pub struct SourceStateOptions {
    /// Used for every read of the source and destination directories.
    pub system: Arc<dyn System>,
    /// Decrypts `encrypted_` files.
    pub encryption: Arc<dyn Encryption>,
    /// Absolute source directory.
    pub source_dir: AbsPath,
    /// Absolute destination directory.
    pub dest_dir: AbsPath,
    /// Home directory, exposed to templates.
    pub home_dir: AbsPath,
    /// Mask applied to every target permission.
    pub umask: u32,
    /// The config file's `[data]`.
    pub config_data: Map<String, Json>,
    /// `--override-data`, merged last.
    pub override_data: Map<String, Json>,
    /// Template options such as `missingkey=zero`.
    pub template_options: Vec<String>,
}

/// The managed entries of a source directory.
#[derive(Debug)]
pub struct SourceState {
    system: Arc<dyn System>,
    encryption: Arc<dyn Encryption>,
    source_dir: AbsPath,
    dest_dir: AbsPath,
    home_dir: AbsPath,
    umask: u32,
    templates: TemplateEngine,
    ignore: PatternSet,
    remove_dirs: BTreeSet<RelPath>,
    root: BTreeMap<RelPath, SourceStateEntry>,
}

impl SourceState {
    /// The system used for reads.
    #[must_use]
    pub fn system(&self) -> &dyn System {
        self.system.as_ref()
    }

    /// The configured encryption.
    #[must_use]
    pub fn encryption(&self) -> &dyn Encryption {
        self.encryption.as_ref()
    }

    /// Absolute source directory.
    #[must_use]
    pub const fn source_dir(&self) -> &AbsPath {
        &self.source_dir
    }

    /// Absolute destination directory.
    #[must_use]
    pub const fn dest_dir(&self) -> &AbsPath {
        &self.dest_dir
    }

    /// Home directory.
    #[must_use]
    pub const fn home_dir(&self) -> &AbsPath {
        &self.home_dir
    }

    /// Mask applied to every target permission.
    #[must_use]
    pub const fn umask(&self) -> u32 {
        self.umask
    }

    /// The template engine, with all data layers merged.
    #[must_use]
    pub const fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// Context for computing target entries.
    #[must_use]
    pub fn target_context(&self) -> TargetContext<'_> {
        TargetContext {
            system: self.system.as_ref(),
            encryption: self.encryption.as_ref(),
            templates: &self.templates,
            source_dir: &self.source_dir,
            dest_dir: &self.dest_dir,
            umask: self.umask,
        }
    }

    /// The entry for `target`, if managed.
    #[must_use]
    pub fn entry(&self, target: &RelPath) -> Option<&SourceStateEntry> {
        self.root.get(target)
    }

    /// Every entry in target path order.
    pub fn entries(&self) -> impl Iterator<Item = (&RelPath, &SourceStateEntry)> {
        self.root.iter()
    }

    /// Whether `target` matches `.chezmoiignore`.
    #[must_use]
    pub fn ignored(&self, target: &RelPath) -> bool {
        self.ignore.matches(target.as_str()) == PatternMatch::Include
    }

    /// Targets of `remove_` directories.
    #[must_use]
    pub const fn remove_dirs(&self) -> &BTreeSet<RelPath> {
        &self.remove_dirs
    }

    /// Every target path in apply order: `before_` scripts, then files and
    /// plain scripts, then `after_` scripts, each group in path order.
    #[must_use]
    pub fn target_rel_paths(&self) -> Vec<RelPath> {
        let mut paths: Vec<(_, &RelPath)> = self
            .root
            .iter()
            .map(|(path, entry)| (entry.order(), path))
            .collect();
        paths.sort();
        paths.into_iter().map(|(_, path)| path.clone()).collect()
    }

    /// Record `path` and each parent directory not yet managed, stopping
    /// at the destination directory or the first managed parent.
    ///
    /// `info` is the already-known metadata of `path`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is outside the destination directory
    /// or cannot be inspected.
    pub fn add_dest_abs_path_info(
        &self,
        infos: &mut BTreeMap<AbsPath, FileInfo>,
        system: &dyn System,
        path: &AbsPath,
        info: Option<FileInfo>,
    ) -> EngineResult<()> {
        let mut path = path.clone();
        let mut info = info;
        loop {
            if path.trim_dir_prefix(&self.dest_dir).is_none() {
                return Err(EngineError::NotInDestDir {
                    path: path.to_string(),
                    dest_dir: self.dest_dir.to_string(),
                });
            }
            if infos.contains_key(&path) {
                return Ok(());
            }
            let current = match info.take() {
                Some(info) => info,
                None => system.lstat(&path)?,
            };
            infos.insert(path.clone(), current);

            let parent = path.parent();
            if parent == self.dest_dir {
                return Ok(());
            }
            let parent_rel = parent.trim_dir_prefix(&self.dest_dir).unwrap_or_default();
            if matches!(self.root.get(&parent_rel), Some(SourceStateEntry::Dir(_))) {
                return Ok(());
            }
            path = parent;
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use super::{SourceState, SourceStateOptions};
    use crate::encryption::XorEncryption;
    use crate::path::AbsPath;
    use crate::system::System;
    use crate::system::test_helpers::MemSystem;

    /// Options for a source directory at `/src` and destination `/home`.
    pub fn options(system: &Arc<MemSystem>) -> SourceStateOptions {
        SourceStateOptions {
            system: Arc::clone(system) as Arc<dyn System>,
            encryption: Arc::new(XorEncryption),
            source_dir: AbsPath::new("/src").unwrap(),
            dest_dir: AbsPath::new("/home").unwrap(),
            home_dir: AbsPath::new("/home").unwrap(),
            umask: 0o022,
            config_data: serde_json::Map::new(),
            override_data: serde_json::Map::new(),
            template_options: Vec::new(),
        }
    }

    /// Read the source state of `system`.
    pub fn read(system: &Arc<MemSystem>) -> SourceState {
        SourceState::read(options(system)).unwrap()
    }
}
