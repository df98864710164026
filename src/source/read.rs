//! Reading a source directory into a [`SourceState`].
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use super::{
    DATA_NAME, IGNORE_NAME, PatternSet, REMOVE_NAME, SCRIPTS_DIR_NAME, SPECIAL_PREFIX,
    SourceContents, SourceState, SourceStateDir, SourceStateEntry, SourceStateFile,
    SourceStateOptions, SourceStateRemove, TEMPLATES_DIR_NAME, VERSION_NAME,
};
use crate::attr::{DirAttr, FileAttr, SourceFileKind, TEMPLATE_SUFFIX};
use crate::error::{EngineError, EngineResult};
use crate::path::{AbsPath, RelPath, SourceRelPath};
use crate::system::{self, DirEntry, FileInfo, FileKind, System, SystemError};
use crate::template::{SystemData, TemplateEngine, TemplateOptions, merge_json};

type Entries = BTreeMap<RelPath, Vec<SourceStateEntry>>;

impl SourceState {
    /// Read the source directory described by `options`.
    ///
    /// A missing source directory yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns an error if a source name cannot be decoded, a special
    /// file is invalid, two source entries produce the same target, or
    /// the filesystem fails.
    pub fn read(options: SourceStateOptions) -> EngineResult<Self> {
        let SourceStateOptions {
            system,
            encryption,
            source_dir,
            dest_dir,
            home_dir,
            umask,
            config_data,
            override_data,
            template_options,
        } = options;

        let exists = match system.stat(&source_dir) {
            Ok(info) if info.is_dir() => true,
            Ok(_) => {
                return Err(SystemError::io(
                    "read",
                    &source_dir,
                    std::io::ErrorKind::NotADirectory.into(),
                )
                .into());
            }
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };

        let mut data = SystemData::gather(&source_dir, &dest_dir, &home_dir).to_layer();
        merge_json(&mut data, config_data);
        let mut named = BTreeMap::new();
        if exists {
            let mut user_data = Map::new();
            collect_data(system.as_ref(), &source_dir, &mut user_data, &mut named)?;
            merge_json(&mut data, user_data);
        }
        merge_json(&mut data, override_data);

        let templates = TemplateEngine::new(
            Arc::clone(&system),
            source_dir.clone(),
            data,
            TemplateOptions {
                templates: named,
                options: template_options,
            },
        );

        let mut state = Self {
            system,
            encryption,
            source_dir,
            dest_dir,
            home_dir,
            umask,
            templates,
            ignore: PatternSet::new(),
            remove_dirs: BTreeSet::new(),
            root: BTreeMap::new(),
        };
        if !exists {
            return Ok(state);
        }

        let mut reader = Reader {
            remove: PatternSet::new(),
            entries: Entries::new(),
        };
        let source_dir = state.source_dir.clone();
        reader.read_dir(
            &mut state,
            &source_dir,
            &SourceRelPath::dir(RelPath::default()),
            &RelPath::default(),
        )?;
        reader.finish(&mut state)?;
        Ok(state)
    }

    fn add_patterns(
        &self,
        set: &mut PatternSet,
        path: &AbsPath,
        dir: &RelPath,
    ) -> EngineResult<()> {
        let data = self.system.read_file(path)?;
        let mut text = String::from_utf8_lossy(&data).into_owned();
        if path.base().ends_with(TEMPLATE_SUFFIX) {
            let name = path
                .trim_dir_prefix(&self.source_dir)
                .unwrap_or_default()
                .to_string();
            text = self.templates.render(&name, &text)?;
        }
        set.add_lines(dir, &text)
            .map_err(|(line, pattern, e)| EngineError::Pattern {
                path: format!("{path}:{line}"),
                pattern,
                message: e.to_string(),
            })
    }
}

struct Reader {
    remove: PatternSet,
    entries: Entries,
}

impl Reader {
    fn push(&mut self, target: RelPath, entry: SourceStateEntry) {
        self.entries.entry(target).or_default().push(entry);
    }

    fn read_dir(
        &mut self,
        state: &mut SourceState,
        dir: &AbsPath,
        dir_source: &SourceRelPath,
        dir_target: &RelPath,
    ) -> EngineResult<()> {
        let mut children = state.system.read_dir(dir)?;
        // Special files first so that ignore patterns apply to siblings.
        children.sort_by(|a, b| {
            let rank = |e: &DirEntry| !e.name.starts_with(SPECIAL_PREFIX);
            (rank(a), &a.name).cmp(&(rank(b), &b.name))
        });

        for DirEntry { name, info } in children {
            let path = dir.join_str(&name);
            let info = if info.kind == FileKind::Symlink {
                if name.starts_with('.') && !name.starts_with(SPECIAL_PREFIX) {
                    continue;
                }
                state.system.stat(&path)?
            } else {
                info
            };

            match name.as_str() {
                n if is_data_file(n) || n == DATA_NAME || n == TEMPLATES_DIR_NAME => {}
                n if n.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(n) == IGNORE_NAME => {
                    let mut ignore = std::mem::take(&mut state.ignore);
                    let result = state.add_patterns(&mut ignore, &path, dir_target);
                    state.ignore = ignore;
                    result?;
                }
                n if n.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(n) == REMOVE_NAME => {
                    state.add_patterns(&mut self.remove, &path, dir_target)?;
                }
                SCRIPTS_DIR_NAME if info.is_dir() => {
                    let source = dir_source.join(&SourceRelPath::dir(RelPath::new(&name)));
                    self.read_scripts_dir(state, &path, &source, dir_target)?;
                }
                VERSION_NAME => check_version(state.system.as_ref(), &path)?,
                n if n.starts_with('.') => {}
                _ => self.read_entry(state, &path, &name, info, dir_source, dir_target)?,
            }
        }
        Ok(())
    }

    fn read_entry(
        &mut self,
        state: &mut SourceState,
        path: &AbsPath,
        name: &str,
        info: FileInfo,
        dir_source: &SourceRelPath,
        dir_target: &RelPath,
    ) -> EngineResult<()> {
        match info.kind {
            FileKind::Dir => {
                let attr = DirAttr::decode(name)?;
                let target = dir_target.join_str(&attr.target_name);
                if state.ignored(&target) {
                    return Ok(());
                }
                let source = dir_source.join(&SourceRelPath::dir(RelPath::new(name)));
                let (external, remove) = (attr.external, attr.remove);
                self.push(
                    target.clone(),
                    SourceStateEntry::Dir(SourceStateDir::new(source.clone(), attr, state.umask)),
                );
                if external {
                    return self.read_external_dir(state, path, &source, &target);
                }
                if remove {
                    state.remove_dirs.insert(target.clone());
                }
                self.read_dir(state, path, &source, &target)
            }
            FileKind::File => {
                let attr = FileAttr::decode(name, state.encryption.encrypted_suffix())?;
                let target = dir_target.join_str(&attr.target_name);
                if state.ignored(&target) {
                    return Ok(());
                }
                let source = dir_source.join(&SourceRelPath::file(RelPath::new(name)));
                self.push(
                    target.clone(),
                    SourceStateEntry::File(SourceStateFile::new(
                        source,
                        target,
                        attr,
                        SourceContents::File(path.clone()),
                    )),
                );
                Ok(())
            }
            FileKind::Symlink | FileKind::Other => Err(EngineError::UnsupportedFileType {
                path: path.to_string(),
            }),
        }
    }

    fn read_scripts_dir(
        &mut self,
        state: &SourceState,
        root: &AbsPath,
        root_source: &SourceRelPath,
        dir_target: &RelPath,
    ) -> EngineResult<()> {
        let system = Arc::clone(&state.system);
        system::walk::<EngineError>(system.as_ref(), root, &mut |path, info| {
            if path == root {
                return Ok(true);
            }
            let name = path.base();
            let info = if info.kind == FileKind::Symlink {
                if name.starts_with('.') && !name.starts_with(SPECIAL_PREFIX) {
                    return Ok(false);
                }
                system.stat(path)?
            } else {
                *info
            };
            if name.starts_with(SPECIAL_PREFIX) {
                return Err(EngineError::NotAScript(path.to_string()));
            }
            if name.starts_with('.') {
                return Ok(false);
            }
            match info.kind {
                FileKind::Dir => Ok(true),
                FileKind::File => {
                    let rel = path.trim_dir_prefix(root).unwrap_or_default();
                    let attr = FileAttr::decode(name, state.encryption.encrypted_suffix())?;
                    if attr.kind != SourceFileKind::Script {
                        return Err(EngineError::NotAScript(path.to_string()));
                    }
                    let target = dir_target
                        .join_str(SCRIPTS_DIR_NAME)
                        .join(&rel.parent())
                        .join_str(&attr.target_name);
                    if state.ignored(&target) {
                        return Ok(false);
                    }
                    let source = root_source.join(&SourceRelPath::file(rel));
                    self.push(
                        target.clone(),
                        SourceStateEntry::File(SourceStateFile::new(
                            source,
                            target,
                            attr,
                            SourceContents::File(path.clone()),
                        )),
                    );
                    Ok(false)
                }
                FileKind::Symlink | FileKind::Other => Err(EngineError::UnsupportedFileType {
                    path: path.to_string(),
                }),
            }
        })
    }

    fn read_external_dir(
        &mut self,
        state: &SourceState,
        root: &AbsPath,
        root_source: &SourceRelPath,
        root_target: &RelPath,
    ) -> EngineResult<()> {
        let system = Arc::clone(&state.system);
        system::walk::<EngineError>(system.as_ref(), root, &mut |path, info| {
            if path == root {
                return Ok(true);
            }
            let rel = path.trim_dir_prefix(root).unwrap_or_default();
            let target = root_target.join(&rel);
            if state.ignored(&target) {
                return Ok(false);
            }
            let name = path.base();
            let entry = match info.kind {
                FileKind::Dir => SourceStateEntry::Dir(SourceStateDir::new(
                    root_source.join(&SourceRelPath::dir(rel)),
                    DirAttr::from_mode(name, info.mode, true),
                    state.umask,
                )),
                FileKind::File => {
                    let attr = FileAttr {
                        empty: true,
                        ..FileAttr::from_mode(name, info.mode)
                    };
                    SourceStateEntry::File(SourceStateFile::new(
                        root_source.join(&SourceRelPath::file(rel)),
                        target.clone(),
                        attr,
                        SourceContents::File(path.clone()),
                    ))
                }
                FileKind::Symlink => {
                    let attr = FileAttr {
                        target_name: name.to_string(),
                        kind: SourceFileKind::Symlink,
                        ..FileAttr::default()
                    };
                    SourceStateEntry::File(SourceStateFile::new(
                        root_source.join(&SourceRelPath::file(rel)),
                        target.clone(),
                        attr,
                        SourceContents::Link(path.clone()),
                    ))
                }
                FileKind::Other => {
                    return Err(EngineError::UnsupportedFileType {
                        path: path.to_string(),
                    });
                }
            };
            self.push(target, entry);
            Ok(true)
        })
    }

    fn finish(mut self, state: &mut SourceState) -> EngineResult<()> {
        self.entries.retain(|target, _| !state.ignored(target));

        for target in self.remove.glob(state.system.as_ref(), &state.dest_dir)? {
            if self.entries.contains_key(&target) || state.ignored(&target) {
                continue;
            }
            self.push(
                target,
                SourceStateEntry::Remove(SourceStateRemove {
                    source_rel_path: SourceRelPath::file(RelPath::new(REMOVE_NAME)),
                    origin: REMOVE_NAME.to_string(),
                }),
            );
        }

        for entries in self.entries.values_mut() {
            canonicalize(entries);
        }

        let mut extra = Vec::new();
        for (target, entries) in &self.entries {
            let [SourceStateEntry::Dir(dir)] = entries.as_slice() else {
                continue;
            };
            if !dir.attr.exact {
                continue;
            }
            let dest = state.dest_dir.join(target);
            match state.system.stat(&dest) {
                Ok(info) if info.is_dir() => {}
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
            for child in state.system.read_dir(&dest)? {
                let child = target.join_str(&child.name);
                if self.entries.contains_key(&child) || state.ignored(&child) {
                    continue;
                }
                extra.push((
                    child,
                    SourceStateRemove {
                        source_rel_path: dir.source_rel_path.clone(),
                        origin: dir.source_rel_path.to_string(),
                    },
                ));
            }
        }
        for (target, remove) in extra {
            self.push(target, SourceStateEntry::Remove(remove));
        }

        for (target, entries) in &self.entries {
            if entries.len() > 1 {
                let mut origins: Vec<String> = entries.iter().map(SourceStateEntry::origin).collect();
                origins.sort();
                return Err(EngineError::Duplicate {
                    path: target.clone(),
                    origins,
                });
            }
        }

        state.root = self
            .entries
            .into_iter()
            .filter_map(|(target, mut entries)| entries.pop().map(|e| (target, e)))
            .collect();
        Ok(())
    }
}

/// Collapse duplicates that are all directories with identical attributes.
fn canonicalize(entries: &mut Vec<SourceStateEntry>) {
    if entries.len() < 2 {
        return;
    }
    let mut attrs = entries.iter().map(|e| match e {
        SourceStateEntry::Dir(d) => Some(&d.attr),
        _ => None,
    });
    let Some(Some(first)) = attrs.next() else {
        return;
    };
    if attrs.all(|attr| attr == Some(first)) {
        entries.truncate(1);
    }
}

fn is_data_file(name: &str) -> bool {
    name.strip_prefix(DATA_NAME)
        .is_some_and(|ext| ext == ".json" || ext == ".toml")
}

/// Gather `.chezmoidata.*` files and `.chezmoitemplates` anywhere in the
/// source tree, in path order.
fn collect_data(
    system: &dyn System,
    dir: &AbsPath,
    data: &mut Map<String, Json>,
    templates: &mut BTreeMap<String, String>,
) -> EngineResult<()> {
    for DirEntry { name, info } in system.read_dir(dir)? {
        let path = dir.join_str(&name);
        let info = if info.kind == FileKind::Symlink {
            match system.stat(&path) {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        } else {
            info
        };
        if is_data_file(&name) && info.kind == FileKind::File {
            merge_json(data, parse_data(system, &path)?);
        } else if name == TEMPLATES_DIR_NAME && info.is_dir() {
            collect_templates(system, &path, templates)?;
        } else if name.starts_with('.') {
            continue;
        } else if info.is_dir() && !DirAttr::decode(&name).is_ok_and(|a| a.external) {
            collect_data(system, &path, data, templates)?;
        }
    }
    Ok(())
}

fn parse_data(system: &dyn System, path: &AbsPath) -> EngineResult<Map<String, Json>> {
    let bytes = system.read_file(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let parsed = if path.base().ends_with(".json") {
        serde_json::from_str::<Map<String, Json>>(&text).map_err(|e| e.to_string())
    } else {
        toml::from_str::<Map<String, Json>>(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|message| EngineError::Data {
        path: path.to_string(),
        message,
    })
}

fn collect_templates(
    system: &dyn System,
    root: &AbsPath,
    templates: &mut BTreeMap<String, String>,
) -> EngineResult<()> {
    system::walk::<EngineError>(system, root, &mut |path, info| {
        if path == root {
            return Ok(true);
        }
        let kind = if info.kind == FileKind::Symlink {
            system.stat(path)?.kind
        } else {
            info.kind
        };
        if path.base().starts_with('.') {
            return Ok(false);
        }
        if kind == FileKind::File {
            let name = path.trim_dir_prefix(root).unwrap_or_default().to_string();
            let contents = system.read_file(path)?;
            templates.insert(name, String::from_utf8_lossy(&contents).into_owned());
        }
        Ok(true)
    })
}

fn check_version(system: &dyn System, path: &AbsPath) -> EngineResult<()> {
    let data = system.read_file(path)?;
    let text = String::from_utf8_lossy(&data);
    let required = semver::Version::parse(text.trim()).map_err(|e| EngineError::Data {
        path: path.to_string(),
        message: format!("{:?}: {e}", text.trim()),
    })?;
    let current = semver::Version::parse(env!("CARGO_PKG_VERSION")).map_err(|e| {
        EngineError::Data {
            path: path.to_string(),
            message: e.to_string(),
        }
    })?;
    if current < required {
        return Err(EngineError::TooOld {
            required: required.to_string(),
            current: current.to_string(),
        });
    }
    Ok(())
}
