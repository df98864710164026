//! `apply`: converge the destination on the target state.
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;

use super::context::{EngineContext, Flags, Output};
use super::prompt::Prompter;
use crate::cli::ApplyOpts;
use crate::engine::{ApplyOptions, PreApply, apply_targets};
use crate::entry_state::{EntryState, EntryStateKind, equivalent, sha256_hex};
use crate::error::{EngineError, EngineResult, Flow};
use crate::logging::{EntryOutcome, Log};
use crate::path::AbsPath;
use crate::source::CONFIG_TEMPLATE_NAMES;
use crate::state::{CONFIG_STATE_BUCKET, PersistentState, StateMode};
use crate::system::{System, unified_diff};

/// `configState` key holding the hash of the config file template.
pub const CONFIG_TEMPLATE_HASH_KEY: &str = "configTemplateContentsSHA256";

const OVERWRITE_CHOICES: &[&str] = &["diff", "overwrite", "all-overwrite", "skip", "quit"];
const INTERACTIVE_CHOICES: &[&str] = &["diff", "yes", "no", "all", "quit"];

/// Decides, before each write, whether to go ahead.
///
/// Without `force`, a target whose destination changed since it was last
/// written is only overwritten after asking. With `interactive`, every
/// change is confirmed.
pub struct ApplyPolicy<'a> {
    force: bool,
    interactive: bool,
    dry_run: bool,
    prompter: &'a mut dyn Prompter,
    output: Output,
    log: &'a dyn Log,
}

impl std::fmt::Debug for ApplyPolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyPolicy")
            .field("force", &self.force)
            .field("interactive", &self.interactive)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl<'a> ApplyPolicy<'a> {
    /// A policy for one run.
    #[must_use]
    pub fn new(
        flags: Flags,
        prompter: &'a mut dyn Prompter,
        output: Output,
        log: &'a dyn Log,
    ) -> Self {
        Self {
            force: flags.force,
            interactive: flags.interactive,
            dry_run: flags.dry_run,
            prompter,
            output,
            log,
        }
    }

    /// Return `Ok` to write `info.target`, or a [`Flow`] sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Flow::Skip`] or [`Flow::Cancel`] as answered, or an error
    /// if the question cannot be asked.
    pub fn check(&mut self, info: &PreApply<'_>) -> EngineResult<()> {
        if info.target.equal(info.actual) {
            return Ok(());
        }
        if !self.force {
            if self.interactive {
                self.confirm(info)?;
            } else if needs_confirmation(info) {
                self.confirm_overwrite(info)?;
            }
        }
        if self.dry_run {
            let verb = match info.target.kind {
                EntryStateKind::Script => "run",
                EntryStateKind::Remove => "remove",
                _ if info.actual.kind == EntryStateKind::Remove => "create",
                _ => "update",
            };
            self.log.dry_run(&format!("{verb} {}", info.target_rel_path));
        }
        Ok(())
    }

    fn confirm_overwrite(&mut self, info: &PreApply<'_>) -> EngineResult<()> {
        let question = format!(
            "{} has changed since it was last written",
            info.target_rel_path
        );
        loop {
            match self.prompter.choice(&question, OVERWRITE_CHOICES)? {
                "diff" => self.write_diff(info)?,
                "overwrite" => return Ok(()),
                "all-overwrite" => {
                    self.force = true;
                    return Ok(());
                }
                "skip" => return self.skip(info, "changed since last written"),
                _ => return Err(EngineError::Flow(Flow::Cancel)),
            }
        }
    }

    fn confirm(&mut self, info: &PreApply<'_>) -> EngineResult<()> {
        let question = format!("Apply {}", info.target_rel_path);
        loop {
            match self.prompter.choice(&question, INTERACTIVE_CHOICES)? {
                "diff" => self.write_diff(info)?,
                "yes" => return Ok(()),
                "all" => {
                    self.force = true;
                    return Ok(());
                }
                "no" => return self.skip(info, "declined"),
                _ => return Err(EngineError::Flow(Flow::Cancel)),
            }
        }
    }

    fn skip(&self, info: &PreApply<'_>, reason: &str) -> EngineResult<()> {
        self.log.record_entry(
            info.target_rel_path.as_str(),
            EntryOutcome::Skipped,
            Some(reason),
        );
        Err(EngineError::Flow(Flow::Skip))
    }

    fn write_diff(&mut self, info: &PreApply<'_>) -> EngineResult<()> {
        let path = info.target_rel_path;
        let diff = unified_diff(
            &format!("a/{path}"),
            &format!("b/{path}"),
            &text(info.actual),
            &text(info.target),
        );
        self.output
            .write_all(diff.as_bytes())
            .map_err(|e| EngineError::Prompt(format!("{path}: {e}")))
    }
}

/// Whether the destination was changed by something else since the last
/// write. Scripts, overwrite targets and never-written targets are not
/// protected.
fn needs_confirmation(info: &PreApply<'_>) -> bool {
    info.target.kind != EntryStateKind::Script
        && !info.target.overwrite
        && info.last_written.is_some()
        && !equivalent(info.last_written, Some(info.actual))
}

fn text(state: &EntryState) -> String {
    state
        .contents
        .as_deref()
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .unwrap_or_default()
}

/// The path an error is attributed to, if any.
pub(super) fn error_path(err: &EngineError) -> String {
    match err {
        EngineError::Target { path, .. } => path.to_string(),
        _ => String::new(),
    }
}

/// Warn when the config file template in `source_dir` differs from the
/// one seen on the previous run, then remember the new hash.
///
/// # Errors
///
/// Returns an error if the template or the state cannot be read, or the
/// state cannot be written.
pub fn check_config_template(
    system: &dyn System,
    source_dir: &AbsPath,
    state: &mut dyn PersistentState,
    log: &dyn Log,
) -> Result<()> {
    let mut contents = None;
    for name in CONFIG_TEMPLATE_NAMES {
        match system.read_file(&source_dir.join_str(name)) {
            Ok(data) => {
                contents = Some(data);
                break;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    let Some(contents) = contents else {
        return Ok(());
    };
    let hash = sha256_hex(&contents);
    let stored = state.get(CONFIG_STATE_BUCKET, CONFIG_TEMPLATE_HASH_KEY)?;
    if stored.as_deref() == Some(hash.as_bytes()) {
        return Ok(());
    }
    if stored.is_some() {
        log.warn("config file template has changed, regenerate the config file from it");
    }
    state.set(CONFIG_STATE_BUCKET, CONFIG_TEMPLATE_HASH_KEY, hash.as_bytes())?;
    Ok(())
}

/// Run `apply`.
///
/// # Errors
///
/// Returns an error if the source state cannot be read, a target fails
/// (all failures, under keep-going), or the run is cancelled.
pub fn run(ctx: &mut EngineContext, opts: &ApplyOpts, log: &dyn Log) -> Result<()> {
    let source_system: Arc<dyn System> = Arc::from(ctx.system(false));
    let source = ctx.read_source(Arc::clone(&source_system))?;
    let rels = ctx.select(&source, &opts.targets.paths, opts.targets.recursive)?;
    let dest_system = ctx.system(false);
    let mut state = ctx.open_state(StateMode::ReadWrite)?;
    check_config_template(source_system.as_ref(), &ctx.source_dir, state.as_mut(), log)?;

    log.stage(if ctx.flags.dry_run {
        "Applying (dry run)"
    } else {
        "Applying"
    });
    log.debug(&format!("{} target(s)", rels.len()));

    let keep_going = ctx.flags.keep_going;
    let mut options = ApplyOptions::new(ctx.dest_dir.clone());
    options.filter = opts.targets.filter.filter();
    let mut policy = ApplyPolicy::new(ctx.flags, ctx.prompter.as_mut(), ctx.output.clone(), log);
    options.pre_apply = Some(Box::new(move |info: &PreApply<'_>| policy.check(info)));

    let stats = apply_targets(
        &source,
        dest_system.as_ref(),
        state.as_mut(),
        &rels,
        &mut options,
        keep_going,
        &mut |err| {
            log.error(&err.to_string());
            log.record_entry(&error_path(err), EntryOutcome::Failed, None);
        },
    )?;
    drop(options);
    state.close()?;

    log.print_summary(&stats);
    if stats.failed > 0 {
        return Err(EngineError::Failed(stats.failed).into());
    }
    Ok(())
}
