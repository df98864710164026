//! Domain-specific error types for the reconciliation engine.
//!
//! Internal modules return typed errors while command handlers at the CLI
//! boundary convert them to [`anyhow::Error`] via the standard `?`
//! operator.
//!
//! # Error hierarchy
//!
//! ```text
//! EngineError
//! ├── Attr(AttrError)              source name decoding
//! ├── Template(TemplateError)      template parse/render
//! ├── System(SystemError)          filesystem, commands, read-only writes
//! ├── State(StateError)            persistent state and its lock
//! ├── Encryption(EncryptionError)  age/gpg
//! ├── Target { path, source }      any of the above, attributed to a path
//! ├── Prompt(message)              no terminal to ask on
//! ├── Failed(n)                    keep-going summary
//! └── Flow(Flow)                   skip/cancel sentinels, never failures
//! ```
use std::fmt;

use thiserror::Error;

use crate::attr::AttrError;
use crate::encryption::EncryptionError;
use crate::path::RelPath;
use crate::state::StateError;
use crate::system::SystemError;
use crate::template::TemplateError;

/// Control-flow outcomes raised from prompts and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Leave this path alone and continue with the next.
    Skip,
    /// Stop cleanly; the process exits zero.
    Cancel,
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skipped"),
            Self::Cancel => f.write_str("cancelled"),
        }
    }
}

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A source name is not in canonical form.
    #[error(transparent)]
    Attr(#[from] AttrError),

    /// A template failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A filesystem or process operation failed.
    #[error(transparent)]
    System(#[from] SystemError),

    /// The persistent state failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// Encryption or decryption failed.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// An error attributed to one target path.
    #[error("{path}: {source}")]
    Target {
        /// Target-relative path.
        path: RelPath,
        /// Underlying error.
        source: Box<EngineError>,
    },

    /// More than one source entry maps to the same target.
    #[error("{path}: duplicate source state entries ({})", origins.join(", "))]
    Duplicate {
        /// Target-relative path.
        path: RelPath,
        /// Source-relative origins, sorted.
        origins: Vec<String>,
    },

    /// A path is not managed.
    #[error("{0}: not in source state")]
    NotInSource(RelPath),

    /// `Add` was asked for a path whose parent is not managed.
    #[error("{0}: parent directory not in source state")]
    ParentNotInSource(RelPath),

    /// A path may not be managed (source dir, config dir, state file).
    #[error("{0}: cannot manage this path")]
    Protected(String),

    /// A path lies outside the destination directory.
    #[error("{path}: not in destination directory {dest_dir}")]
    NotInDestDir {
        /// Offending path.
        path: String,
        /// Destination directory.
        dest_dir: String,
    },

    /// A source or destination entry is a socket, device or fifo.
    #[error("{path}: unsupported file type")]
    UnsupportedFileType {
        /// Offending path.
        path: String,
    },

    /// A `.chezmoiscripts` directory contains something other than scripts.
    #[error("{0}: not a script")]
    NotAScript(String),

    /// A `.chezmoidata` file could not be parsed.
    #[error("{path}: {message}")]
    Data {
        /// Source-relative path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// A pattern in `.chezmoiignore` or `.chezmoiremove` is invalid.
    #[error("{path}: invalid pattern {pattern}: {message}")]
    Pattern {
        /// File the pattern came from.
        path: String,
        /// The pattern.
        pattern: String,
        /// Parser message.
        message: String,
    },

    /// The source state requires a newer binary.
    #[error("source state requires version {required} or later, running version {current}")]
    TooOld {
        /// Version named in `.chezmoiversion`.
        required: String,
        /// This binary's version.
        current: String,
    },

    /// A modify script exited non-zero or produced invalid output.
    #[error("{path}: {message}")]
    Invalid {
        /// Target-relative path.
        path: RelPath,
        /// What went wrong.
        message: String,
    },

    /// A question could not be asked.
    #[error("{0}")]
    Prompt(String),

    /// Some targets failed while keep-going was enabled.
    #[error("{0} target(s) failed")]
    Failed(u32),

    /// A prompt or callback asked to skip or cancel.
    #[error("{0}")]
    Flow(Flow),
}

impl EngineError {
    /// Attribute this error to `path`, unless it already is or is a
    /// control-flow sentinel.
    #[must_use]
    pub fn at(self, path: &RelPath) -> Self {
        match self {
            Self::Target { .. } | Self::Flow(_) => self,
            other => Self::Target {
                path: path.clone(),
                source: Box::new(other),
            },
        }
    }

    /// The control-flow sentinel carried by this error, if any.
    #[must_use]
    pub fn flow(&self) -> Option<Flow> {
        match self {
            Self::Flow(flow) => Some(*flow),
            Self::Target { source, .. } => source.flow(),
            _ => None,
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Whether an [`anyhow::Error`] is a clean cancellation.
#[must_use]
pub fn is_cancel(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .is_some_and(|e| e.flow() == Some(Flow::Cancel))
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn target_errors_name_the_path_once() {
        let err = EngineError::NotAScript("x".into())
            .at(&RelPath::new(".bashrc"))
            .at(&RelPath::new("other"));
        assert_eq!(err.to_string(), ".bashrc: x: not a script");
    }

    #[test]
    fn flow_survives_attribution() {
        let err = EngineError::Flow(Flow::Skip).at(&RelPath::new("a"));
        assert_eq!(err.flow(), Some(Flow::Skip));
    }

    #[test]
    fn duplicate_lists_origins() {
        let err = EngineError::Duplicate {
            path: RelPath::new(".file"),
            origins: vec!["dot_file".into(), "dot_file.tmpl".into()],
        };
        assert_eq!(
            err.to_string(),
            ".file: duplicate source state entries (dot_file, dot_file.tmpl)"
        );
    }

    #[test]
    fn cancel_is_found_through_context() {
        let err = anyhow::Error::new(EngineError::Flow(Flow::Cancel)).context("applying");
        assert!(is_cancel(&err));
        assert!(!is_cancel(&anyhow::anyhow!("boom")));
    }
}
