//! `add`: bring destination entries under management.
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::context::EngineContext;
use super::prompt::Confirm;
use crate::cli::AddOpts;
use crate::engine::{AddOptions, PreAdd, add};
use crate::error::{EngineError, EngineResult, Flow};
use crate::logging::{EntryOutcome, Log};
use crate::path::AbsPath;
use crate::state::StateMode;
use crate::system::{FileInfo, FileKind, System, SystemError, mkdir_all, walk};

/// Gather metadata for `paths`, their unmanaged parents, and with
/// `recursive` everything beneath them. With `follow`, symlinks are
/// described by what they point to.
fn collect_infos(
    source: &crate::source::SourceState,
    dest: &dyn System,
    paths: &[AbsPath],
    opts: &AddOpts,
) -> EngineResult<BTreeMap<AbsPath, FileInfo>> {
    let observe = |path: &AbsPath, info: FileInfo| -> Result<FileInfo, SystemError> {
        if opts.follow && info.kind == FileKind::Symlink {
            dest.stat(path)
        } else {
            Ok(info)
        }
    };
    let mut infos = BTreeMap::new();
    for path in paths {
        let info = observe(path, dest.lstat(path)?)?;
        source.add_dest_abs_path_info(&mut infos, dest, path, Some(info))?;
        if opts.recursive && info.is_dir() {
            walk(dest, path, &mut |p: &AbsPath, i: &FileInfo| -> EngineResult<bool> {
                if p != path {
                    infos.insert(p.clone(), observe(p, *i)?);
                }
                Ok(true)
            })?;
        }
    }
    Ok(infos)
}

fn confirm_lost_attrs(confirm: &mut Confirm<'_>, info: &PreAdd<'_>) -> EngineResult<()> {
    if info.lost.is_empty() {
        return Ok(());
    }
    let question = format!(
        "adding {} would remove the {} attribute(s) of {}, continue",
        info.target_rel_path,
        info.lost.join(", "),
        info.old_source.map_or_else(String::new, ToString::to_string),
    );
    if confirm.ask(&question)? {
        Ok(())
    } else {
        Err(EngineError::Flow(Flow::Skip))
    }
}

/// Run `add`.
///
/// # Errors
///
/// Returns an error if a path is protected, outside the destination, has
/// an unmanaged parent, or cannot be read or written.
pub fn run(ctx: &mut EngineContext, opts: &AddOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    mkdir_all(source_system.as_ref(), &ctx.source_dir, 0o777)
        .with_context(|| format!("creating {}", ctx.source_dir))?;
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let dest = ctx.system(true);
    let paths = ctx.abs_paths(&opts.paths);
    let infos = collect_infos(&source, dest.as_ref(), &paths, opts)?;
    let mut state = ctx.open_state(StateMode::ReadWrite)?;

    log.stage(if ctx.flags.dry_run {
        "Adding (dry run)"
    } else {
        "Adding"
    });
    let dry_run = ctx.flags.dry_run;
    let force = ctx.flags.force;
    let protected = ctx.protected_paths();
    let mut confirm = Confirm::new(ctx.prompter.as_mut(), force);
    let mut options = AddOptions {
        create: opts.create,
        encrypt: opts.encrypt,
        exact: opts.exact,
        template: opts.template,
        autotemplate: opts.autotemplate,
        filter: opts.filter.filter(),
        protected,
        pre_add: Some(Box::new(|info: &PreAdd<'_>| {
            let answer = confirm_lost_attrs(&mut confirm, info);
            if answer.as_ref().is_err_and(|e| e.flow() == Some(Flow::Skip)) {
                log.record_entry(
                    info.target_rel_path.as_str(),
                    EntryOutcome::Skipped,
                    Some("would lose attributes"),
                );
            }
            answer
        })),
    };

    let added = add(
        &source,
        source_system.as_ref(),
        state.as_mut(),
        dest.as_ref(),
        &infos,
        &mut options,
    )?;
    drop(options);
    state.close()?;

    for rel in &added {
        if dry_run {
            log.dry_run(&format!("add {rel}"));
        } else {
            log.info(&format!("added {rel}"));
        }
    }
    Ok(())
}
