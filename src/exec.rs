//! External command execution.
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;

/// Result of a command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    /// Captured standard output (empty for interactive commands).
    pub stdout: Vec<u8>,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
    /// Whether the command exited zero.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Errors running an external command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The process could not be started.
    #[error("failed to execute: {command}: {source}")]
    Spawn {
        /// The command line.
        command: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The process exited non-zero.
    #[error("{command} failed (exit {code}): {stderr}")]
    Failed {
        /// The command line.
        command: String,
        /// Exit code, or -1 if killed by a signal.
        code: i32,
        /// Trimmed standard error.
        stderr: String,
    },
}

/// A command to run: program, arguments, working directory and optional
/// standard input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    /// Program name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub dir: Option<PathBuf>,
    /// Data written to standard input.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Inherit the terminal instead of capturing output.
    pub interactive: bool,
}

impl Cmd {
    /// A command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    /// Feed `data` on standard input.
    #[must_use]
    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Run attached to the terminal.
    #[must_use]
    pub const fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Run a command, failing on non-zero exit.
///
/// # Errors
///
/// Returns [`ExecError::Spawn`] if the process cannot start and
/// [`ExecError::Failed`] if it exits non-zero.
pub fn run(cmd: &Cmd) -> Result<ExecResult, ExecError> {
    let result = run_unchecked(cmd)?;
    if !result.success {
        return Err(ExecError::Failed {
            command: cmd.to_string(),
            code: result.code.unwrap_or(-1),
            stderr: result.stderr.trim().to_string(),
        });
    }
    Ok(result)
}

/// Run a command, returning its result even on non-zero exit.
///
/// # Errors
///
/// Returns [`ExecError::Spawn`] if the process cannot start or its input
/// cannot be written.
pub fn run_unchecked(cmd: &Cmd) -> Result<ExecResult, ExecError> {
    tracing::debug!("exec: {cmd}");
    let spawn_err = |source| ExecError::Spawn {
        command: cmd.to_string(),
        source,
    };
    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if let Some(dir) = &cmd.dir {
        command.current_dir(dir);
    }
    for (k, v) in &cmd.env {
        command.env(k, v);
    }

    if cmd.interactive {
        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        let mut child = command.spawn().map_err(spawn_err)?;
        write_stdin(&mut child, cmd.stdin.as_deref()).map_err(spawn_err)?;
        let status = child.wait().map_err(spawn_err)?;
        return Ok(ExecResult {
            success: status.success(),
            code: status.code(),
            ..ExecResult::default()
        });
    }

    command
        .stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn().map_err(spawn_err)?;
    write_stdin(&mut child, cmd.stdin.as_deref()).map_err(spawn_err)?;
    let output = child.wait_with_output().map_err(spawn_err)?;
    Ok(ExecResult::from(output))
}

fn write_stdin(child: &mut std::process::Child, data: Option<&[u8]>) -> std::io::Result<()> {
    if let (Some(data), Some(mut stdin)) = (data, child.stdin.take()) {
        stdin.write_all(data)?;
    }
    Ok(())
}

/// Check if a program is available on PATH.
#[must_use]
pub fn which(program: &str) -> bool {
    which::which(program).is_ok()
}
