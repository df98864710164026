//! Everything a command needs, resolved once from flags and the config file.
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context as _, Result};

use super::prompt::{Prompter, TerminalPrompter};
use crate::cli::GlobalOpts;
use crate::config::{self, Config};
use crate::engine::select_targets;
use crate::path::{AbsPath, RelPath};
use crate::source::{SourceState, SourceStateOptions};
use crate::state::{self, PersistentState, StateMode};
use crate::system::{DebugSystem, DryRunSystem, ReadOnlySystem, RealSystem, System};

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "dotstate.toml";
/// Persistent state file name inside the config directory.
pub const STATE_FILE_NAME: &str = "dotstate.db";

/// A cloneable handle to command output.
#[derive(Clone)]
pub struct Output(Arc<Mutex<Box<dyn Write + Send>>>);

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Output")
    }
}

impl Output {
    /// Write to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }

    /// Write to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write to memory, returning the handle to read it back.
    #[must_use]
    pub fn capture() -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(Box::new(captured.clone())), captured)
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// Output collected by [`Output::capture`].
#[derive(Debug, Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// Everything written so far.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run-wide switches from the command line and config file.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Flags {
    /// Record mutations instead of performing them.
    pub dry_run: bool,
    /// Never ask before overwriting.
    pub force: bool,
    /// Continue past per-target errors.
    pub keep_going: bool,
    /// Ask before every change.
    pub interactive: bool,
    /// Log every system call.
    pub verbose: bool,
}

/// Resolved directories, config, flags and I/O handles for one command.
pub struct EngineContext {
    /// The loaded config file.
    pub config: Config,
    /// Run-wide switches.
    pub flags: Flags,
    /// Home directory.
    pub home_dir: AbsPath,
    /// Directory relative paths on the command line are resolved against.
    pub working_dir: AbsPath,
    /// Source directory.
    pub source_dir: AbsPath,
    /// Destination directory.
    pub dest_dir: AbsPath,
    /// Directory holding the config file.
    pub config_dir: AbsPath,
    /// Persistent state file.
    pub state_path: AbsPath,
    /// Template data from `--override-data`, merged last.
    pub override_data: serde_json::Map<String, serde_json::Value>,
    /// Asks the user questions.
    pub prompter: Box<dyn Prompter>,
    /// Command output.
    pub output: Output,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("flags", &self.flags)
            .field("source_dir", &self.source_dir)
            .field("dest_dir", &self.dest_dir)
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

fn abs(path: &Path, what: &str) -> Result<AbsPath> {
    AbsPath::new(path).with_context(|| format!("{what} {} is not absolute", path.display()))
}

impl EngineContext {
    /// Resolve the context from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the home or working directory is unknown, or
    /// the config file cannot be loaded.
    pub fn from_env(global: &GlobalOpts, verbose: bool) -> Result<Self> {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .context("cannot determine home directory")?;
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        let home = dunce::canonicalize(&home).unwrap_or(home);
        Self::new(global, verbose, &home, &cwd)
    }

    /// Resolve the context against explicit home and working directories.
    ///
    /// Command-line flags win over config file values, which win over the
    /// XDG defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory is not absolute or the config file
    /// cannot be loaded.
    pub fn new(global: &GlobalOpts, verbose: bool, home: &Path, cwd: &Path) -> Result<Self> {
        let home_dir = abs(home, "home directory")?;
        let working_dir = abs(cwd, "working directory")?;
        let ext = |p: &Path, base: &AbsPath| AbsPath::from_ext(&p.to_string_lossy(), base, &home_dir);

        let config_file = global.config.as_ref().map_or_else(
            || abs(&config::default_config_dir(home).join(CONFIG_FILE_NAME), "config file"),
            |p| Ok(ext(p, &working_dir)),
        )?;
        let config_dir = config_file.parent();
        let config = Config::load(config_file.as_path())?;

        let source_dir = match (&global.source, &config.source_dir) {
            (Some(p), _) => ext(p, &working_dir),
            (None, Some(s)) => ext(Path::new(s), &home_dir),
            (None, None) => abs(&config::default_source_dir(home), "source directory")?,
        };
        let dest_dir = match (&global.destination, &config.dest_dir) {
            (Some(p), _) => ext(p, &working_dir),
            (None, Some(s)) => ext(Path::new(s), &home_dir),
            (None, None) => home_dir.clone(),
        };
        let state_path = match (&global.persistent_state, &config.persistent_state) {
            (Some(p), _) => ext(p, &working_dir),
            (None, Some(s)) => ext(Path::new(s), &home_dir),
            (None, None) => config_dir.join_str(STATE_FILE_NAME),
        };

        let override_data = match &global.override_data {
            Some(json) => serde_json::from_str(json).context("parsing --override-data")?,
            None => serde_json::Map::new(),
        };

        let flags = Flags {
            dry_run: global.dry_run,
            force: global.force,
            keep_going: global.keep_going || config.keep_going,
            interactive: global.interactive,
            verbose,
        };
        tracing::debug!(
            "source {source_dir}, destination {dest_dir}, state {state_path}"
        );

        Ok(Self {
            config,
            flags,
            home_dir,
            working_dir,
            source_dir,
            dest_dir,
            config_dir,
            state_path,
            override_data,
            prompter: Box::new(TerminalPrompter::stdio(global.no_tty)),
            output: Output::stdout(),
        })
    }

    /// Replace the prompter.
    #[must_use]
    pub fn with_prompter(mut self, prompter: Box<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Replace the output.
    #[must_use]
    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    /// The host system wrapped for this run: dry-run and debug decorators
    /// as flagged, and a read-only guard outermost when `read_only`.
    #[must_use]
    pub fn system(&self, read_only: bool) -> Box<dyn System> {
        let mut system: Box<dyn System> = Box::new(RealSystem::new(self.config.umask));
        if self.flags.dry_run {
            system = Box::new(DryRunSystem::new(system));
        }
        if self.flags.verbose {
            system = Box::new(DebugSystem::new(system));
        }
        if read_only {
            system = Box::new(ReadOnlySystem::new(system));
        }
        system
    }

    /// Read the source state through `system`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source directory cannot be read or decoded.
    pub fn read_source(&self, system: Arc<dyn System>) -> Result<SourceState> {
        SourceState::read(SourceStateOptions {
            system,
            encryption: self.config.encryption(),
            source_dir: self.source_dir.clone(),
            dest_dir: self.dest_dir.clone(),
            home_dir: self.home_dir.clone(),
            umask: self.config.umask,
            config_data: self.config.data.clone(),
            override_data: self.override_data.clone(),
            template_options: self.config.template.options.clone(),
        })
        .with_context(|| format!("reading source state {}", self.source_dir))
    }

    /// Open the persistent state; read-write becomes read-mock-write in a
    /// dry run.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock times out or the file cannot be opened.
    pub fn open_state(&self, mode: StateMode) -> Result<Box<dyn PersistentState>> {
        let mode = mode.for_dry_run(self.flags.dry_run);
        let path = self.state_path.as_path();
        if mode == StateMode::ReadWrite
            && let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        state::open(mode, path, self.config.lock_timeout())
            .with_context(|| format!("opening {}", self.state_path))
    }

    /// Paths `add` must refuse: the source directory, the config
    /// directory and the state file.
    #[must_use]
    pub fn protected_paths(&self) -> Vec<AbsPath> {
        vec![
            self.source_dir.clone(),
            self.config_dir.clone(),
            self.state_path.clone(),
        ]
    }

    /// Command-line paths made absolute.
    #[must_use]
    pub fn abs_paths(&self, paths: &[PathBuf]) -> Vec<AbsPath> {
        paths
            .iter()
            .map(|p| AbsPath::from_ext(&p.to_string_lossy(), &self.working_dir, &self.home_dir))
            .collect()
    }

    /// Managed targets named by `paths`, or all of them, in apply order.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is outside the destination or unmanaged.
    pub fn select(
        &self,
        source: &SourceState,
        paths: &[PathBuf],
        recursive: bool,
    ) -> Result<Vec<RelPath>> {
        Ok(select_targets(source, &self.abs_paths(paths), recursive)?)
    }
}
