//! Template execution over layered data.
//!
//! Templates use `minijinja` syntax. The data map is assembled from, in
//! increasing priority: system facts under `chezmoi`, the config file's
//! `[data]`, `.chezmoidata.*` files and `--override-data`. Nested maps are
//! merged recursively; scalars and lists in later layers replace earlier
//! ones.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use minijinja::value::{Rest, Value};
use minijinja::{AutoEscape, Environment, ErrorKind, State, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::exec::Cmd;
use crate::path::{AbsPath, RelPath};
use crate::system::System;

/// Marker that turns a `modify_` script into a template over the current
/// contents.
pub const MODIFY_TEMPLATE_MARKER: &str = "chezmoi:modify-template";

/// A template failed to parse or render.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct TemplateError {
    /// Template name, usually the source-relative path.
    pub name: String,
    /// Engine message.
    pub message: String,
}

impl TemplateError {
    fn new(name: &str, err: &minijinja::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            name: name.to_string(),
            message,
        }
    }
}

/// Facts about the running system, exposed as `chezmoi.*`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemData {
    /// Source directory.
    pub source_dir: String,
    /// Destination directory.
    pub dest_dir: String,
    /// Home directory.
    pub home_dir: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// CPU architecture, e.g. `x86_64`.
    pub arch: String,
    /// Current user name.
    pub username: String,
    /// Host name without domain.
    pub hostname: String,
}

impl SystemData {
    /// Gather facts from the environment.
    #[must_use]
    pub fn gather(source_dir: &AbsPath, dest_dir: &AbsPath, home_dir: &AbsPath) -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let hostname = std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
            .unwrap_or_default();
        let hostname = hostname.trim().split('.').next().unwrap_or("").to_string();
        Self {
            source_dir: source_dir.to_string(),
            dest_dir: dest_dir.to_string(),
            home_dir: home_dir.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            username,
            hostname,
        }
    }

    /// The `{"chezmoi": {...}}` layer.
    #[must_use]
    pub fn to_layer(&self) -> Map<String, Json> {
        let mut layer = Map::new();
        layer.insert(
            "chezmoi".to_string(),
            serde_json::to_value(self).unwrap_or(Json::Null),
        );
        layer
    }
}

/// Recursively merge `src` into `dst`; values in `src` win.
pub fn merge_json(dst: &mut Map<String, Json>, src: Map<String, Json>) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Json::Object(d)), Json::Object(s)) => merge_json(d, s),
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Settings for [`TemplateEngine::new`].
#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Named templates from `.chezmoitemplates`.
    pub templates: BTreeMap<String, String>,
    /// Options from the config file such as `missingkey=zero`.
    pub options: Vec<String>,
}

/// Renders source templates against the merged data.
pub struct TemplateEngine {
    env: Environment<'static>,
    data: Map<String, Json>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

fn invalid(err: impl std::fmt::Display) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
}

impl TemplateEngine {
    /// Build an engine whose `include` and `output` functions go through
    /// `system`, with `include` paths relative to `source_dir`.
    #[must_use]
    pub fn new(
        system: Arc<dyn System>,
        source_dir: AbsPath,
        data: Map<String, Json>,
        options: TemplateOptions,
    ) -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_undefined_behavior(undefined_behavior(&options.options));

        let include_system = Arc::clone(&system);
        env.add_function("include", move |path: String| {
            let abs = AbsPath::new(&path).unwrap_or_else(|| source_dir.join(&RelPath::new(&path)));
            include_system
                .read_file(&abs)
                .map(|data| String::from_utf8_lossy(&data).into_owned())
                .map_err(invalid)
        });

        let output_system = system;
        env.add_function("output", move |name: String, args: Rest<String>| {
            let cmd = Cmd::new(name).args(args.0);
            output_system
                .idempotent_cmd_output(&cmd)
                .map(|r| String::from_utf8_lossy(&r.stdout).into_owned())
                .map_err(invalid)
        });

        env.add_function("env", |name: String| std::env::var(name).unwrap_or_default());
        env.add_function("joinPath", |parts: Rest<String>| {
            parts
                .0
                .iter()
                .collect::<PathBuf>()
                .to_string_lossy()
                .replace('\\', "/")
        });
        env.add_function("lookPath", |name: String| {
            which::which(name)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let named = Arc::new(options.templates);
        let template_data = Value::from_serialize(&data);
        env.add_function(
            "template",
            move |state: &State, name: String, ctx: Option<Value>| {
                let source = named.get(&name).ok_or_else(|| {
                    minijinja::Error::new(
                        ErrorKind::TemplateNotFound,
                        format!("{name}: no such template"),
                    )
                })?;
                let ctx = ctx.unwrap_or_else(|| template_data.clone());
                state.env().render_named_str(&name, source, ctx)
            },
        );

        Self { env, data }
    }

    /// The merged data map.
    #[must_use]
    pub const fn data(&self) -> &Map<String, Json> {
        &self.data
    }

    /// Render `source` against the data.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] naming `name` if the template fails to
    /// parse or render.
    pub fn render(&self, name: &str, source: &str) -> Result<String, TemplateError> {
        self.env
            .render_named_str(name, source, &self.data)
            .map_err(|e| TemplateError::new(name, &e))
    }

    /// Render with `extra` merged over the data.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] naming `name` if the template fails to
    /// parse or render.
    pub fn render_with(
        &self,
        name: &str,
        source: &str,
        extra: Map<String, Json>,
    ) -> Result<String, TemplateError> {
        let mut data = self.data.clone();
        merge_json(&mut data, extra);
        self.env
            .render_named_str(name, source, &data)
            .map_err(|e| TemplateError::new(name, &e))
    }

    /// Render a `modify_` template with the current contents available as
    /// `chezmoi.stdin`.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if rendering fails.
    pub fn render_modify(
        &self,
        name: &str,
        source: &str,
        current: &[u8],
    ) -> Result<String, TemplateError> {
        let mut chezmoi = Map::new();
        chezmoi.insert(
            "stdin".to_string(),
            Json::String(String::from_utf8_lossy(current).into_owned()),
        );
        let mut extra = Map::new();
        extra.insert("chezmoi".to_string(), Json::Object(chezmoi));
        self.render_with(name, source, extra)
    }
}

fn undefined_behavior(options: &[String]) -> UndefinedBehavior {
    let mut behavior = UndefinedBehavior::Strict;
    for option in options {
        match option.as_str() {
            "missingkey=zero" | "missingkey=default" | "missingkey=invalid" => {
                behavior = UndefinedBehavior::Chainable;
            }
            "missingkey=error" => behavior = UndefinedBehavior::Strict,
            other => tracing::warn!("ignoring unknown template option {other}"),
        }
    }
    behavior
}

/// Turn `contents` into a template: escape literal `{{`/`}}` runs and
/// replace string values from `data` with references to their keys.
///
/// Longer values are replaced first; ties prefer the shallower key, then
/// the alphabetically first. Values shorter than three characters and
/// matches inside a word are left alone. Returns the new contents and
/// whether anything changed.
#[must_use]
pub fn autotemplate(contents: &str, data: &Map<String, Json>) -> (String, bool) {
    let mut out = escape_markers(contents);
    let mut replaced = out != contents;

    let mut variables = Vec::new();
    collect_variables(&mut variables, &mut Vec::new(), data);
    variables.sort_by(|(ak, av), (bk, bv)| {
        bv.len()
            .cmp(&av.len())
            .then(ak.len().cmp(&bk.len()))
            .then_with(|| ak.cmp(bk))
    });

    for (keys, value) in variables {
        if value.chars().count() < 3 {
            continue;
        }
        let replacement = format!("{{{{ {} }}}}", keys.join("."));
        let mut result = String::with_capacity(out.len());
        let mut rest = out.as_str();
        let mut consumed = 0;
        while let Some(i) = rest.find(value.as_str()) {
            let start = consumed + i;
            let end = start + value.len();
            let (head, tail) = rest.split_at(i);
            result.push_str(head);
            if in_word(&out, start) || in_word(&out, end) {
                result.push_str(&value);
            } else {
                result.push_str(&replacement);
                replaced = true;
            }
            rest = tail.get(value.len()..).unwrap_or("");
            consumed = end;
        }
        result.push_str(rest);
        out = result;
    }
    (out, replaced)
}

fn escape_markers(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut chars = contents.chars().peekable();
    while let Some(c) = chars.next() {
        if (c == '{' || c == '}') && chars.peek() == Some(&c) {
            let mut run = String::from(c);
            while chars.peek() == Some(&c) {
                run.push(c);
                chars.next();
            }
            out.push_str(&format!("{{{{ \"{run}\" }}}}"));
        } else {
            out.push(c);
        }
    }
    out
}

fn collect_variables(out: &mut Vec<(Vec<String>, String)>, parent: &mut Vec<String>, data: &Map<String, Json>) {
    for (key, value) in data {
        match value {
            Json::String(s) => {
                let mut keys = parent.clone();
                keys.push(key.clone());
                out.push((keys, s.clone()));
            }
            Json::Object(map) => {
                parent.push(key.clone());
                collect_variables(out, parent, map);
                parent.pop();
            }
            _ => {}
        }
    }
}

fn in_word(s: &str, i: usize) -> bool {
    let bytes = s.as_bytes();
    i > 0
        && bytes.get(i - 1).is_some_and(u8::is_ascii_alphanumeric)
        && bytes.get(i).is_some_and(u8::is_ascii_alphanumeric)
}
