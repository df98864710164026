//! `merge`: three-way merge through an external tool.
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use serde_json::{Map, Value as Json};

use super::context::EngineContext;
use crate::cli::PathsOpts;
use crate::exec::Cmd;
use crate::logging::Log;
use crate::source::{SourceState, SourceStateEntry};
use crate::state::StateMode;
use crate::system::System;
use crate::target::TargetStateEntry;
use crate::template::TemplateEngine;

/// The merge tool's arguments for one file.
///
/// When any configured argument is a template, every argument is rendered
/// with `destination`, `source` and `target` in scope. Otherwise the three
/// paths are appended in that order.
///
/// # Errors
///
/// Returns an error if an argument template fails.
pub fn merge_args(
    templates: &TemplateEngine,
    args: &[String],
    destination: &str,
    source: &str,
    target: &str,
) -> Result<Vec<String>> {
    if !args.iter().any(|a| a.contains("{{")) {
        let mut all = args.to_vec();
        all.extend([destination, source, target].map(str::to_string));
        return Ok(all);
    }
    let mut extra = Map::new();
    extra.insert("destination".into(), Json::from(destination));
    extra.insert("source".into(), Json::from(source));
    extra.insert("target".into(), Json::from(target));
    args.iter()
        .enumerate()
        .map(|(i, arg)| {
            templates
                .render_with(&format!("merge.args[{i}]"), arg, extra.clone())
                .map_err(Into::into)
        })
        .collect()
}

fn write_temp(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

/// Run `merge` for each path in turn.
///
/// # Errors
///
/// Returns an error if a target is not a managed file, the merge tool
/// fails, or the merged source cannot be re-encrypted.
pub fn run(ctx: &mut EngineContext, opts: &PathsOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let rels = ctx.select(&source, &opts.paths, false)?;
    let mut state = ctx.open_state(StateMode::ReadOnly)?;
    // The merge tool may run this program again.
    state.close()?;

    for rel in &rels {
        merge_one(ctx, &source, source_system.as_ref(), rel, log)?;
    }
    Ok(())
}

fn merge_one(
    ctx: &EngineContext,
    source: &SourceState,
    source_system: &dyn System,
    rel: &crate::path::RelPath,
    log: &dyn Log,
) -> Result<()> {
    let Some(SourceStateEntry::File(file)) = source.entry(rel) else {
        bail!("{rel}: not a file");
    };
    let target_ctx = source.target_context();
    let TargetStateEntry::File { contents, .. } = file.target(&target_ctx)? else {
        bail!("{rel}: not a file");
    };

    let tmp = tempfile::Builder::new()
        .prefix("dotstate-merge-")
        .tempdir()
        .context("creating temporary directory")?;
    let source_path = if file.attr.encrypted {
        let plain = tmp.path().join(format!("{}.plaintext", rel.base()));
        write_temp(&plain, file.plaintext(&target_ctx)?)?;
        plain
    } else {
        file.abs_path().to_path_buf()
    };
    let target_path = tmp.path().join(rel.base());
    write_temp(&target_path, contents)?;

    let dest_path = ctx.dest_dir.join(rel);
    let merge = &ctx.config.merge;
    let args = merge_args(
        source.templates(),
        &merge.args,
        dest_path.as_str(),
        &source_path.to_string_lossy(),
        &target_path.to_string_lossy(),
    )?;
    let cmd = Cmd::new(merge.command.clone()).args(args).interactive();
    log.debug(&format!("running {cmd}"));
    source_system
        .run_cmd(&cmd)
        .with_context(|| format!("{rel}: merge failed"))?;

    if file.attr.encrypted {
        let merged = std::fs::read(&source_path)
            .with_context(|| format!("reading {}", source_path.display()))?;
        let encrypted = source.encryption().encrypt(source_system, &merged)?;
        let perm = source_system.lstat(file.abs_path())?.mode & 0o7777;
        source_system.write_file(file.abs_path(), &encrypted, perm)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::test_helpers;
    use crate::system::test_helpers::MemSystem;

    fn templates() -> SourceState {
        test_helpers::read(&Arc::new(MemSystem::new().with_dir("/src", 0o755)))
    }

    #[test]
    fn plain_arguments_get_the_three_paths_appended() {
        let source = templates();
        let args = merge_args(source.templates(), &["-d".into()], "/h/.a", "/s/dot_a", "/t/.a")
            .unwrap();
        assert_eq!(args, ["-d", "/h/.a", "/s/dot_a", "/t/.a"]);
    }

    #[test]
    fn templated_arguments_are_rendered_instead() {
        let source = templates();
        let args = merge_args(
            source.templates(),
            &[
                "merge".into(),
                "{{ destination }}".into(),
                "--base={{ target }}".into(),
                "{{ source }}".into(),
            ],
            "/h/.a",
            "/s/dot_a",
            "/t/.a",
        )
        .unwrap();
        assert_eq!(args, ["merge", "/h/.a", "--base=/t/.a", "/s/dot_a"]);
    }
}
