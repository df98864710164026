//! Command-line arguments.
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::engine::{EntryFilter, EntryKind};
use crate::system::ArchiveFormat;

/// Top-level CLI entry point.
#[derive(Parser, Debug)]
#[command(
    name = "dotstate",
    about = "Manage dotfiles by reconciling a source directory with your home directory",
    version
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Show what would change without changing anything
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Overwrite changed targets without prompting
    #[arg(long, global = true)]
    pub force: bool,

    /// Continue after errors, failing at the end
    #[arg(short, long, global = true)]
    pub keep_going: bool,

    /// Source directory
    #[arg(short = 'S', long = "source", global = true, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Destination directory
    #[arg(short = 'D', long = "destination", global = true, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// Config file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Persistent state file
    #[arg(long, global = true, value_name = "FILE")]
    pub persistent_state: Option<PathBuf>,

    /// Read prompt answers from standard input even when it is not a terminal
    #[arg(long, global = true)]
    pub no_tty: bool,

    /// Ask before changing each target
    #[arg(long, global = true)]
    pub interactive: bool,

    /// JSON object merged over the template data
    #[arg(long, global = true, value_name = "JSON")]
    pub override_data: Option<String>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Update the destination to match the target state
    Apply(ApplyOpts),
    /// Add destination entries to the source state
    Add(AddOpts),
    /// Print the changes apply would make
    Diff(TargetOpts),
    /// Print a two-column status of each target
    Status(TargetOpts),
    /// Three-way merge destination, source and target with the merge tool
    Merge(PathsOpts),
    /// Remove targets from the source state, the destination and the history
    Destroy(DestroyOpts),
    /// Stop managing targets, leaving the destination untouched
    Forget(PathsOpts),
    /// Change the attributes of targets in the source state
    Chattr(ChattrOpts),
    /// Write the target state as a tar archive
    Archive(ArchiveOpts),
    /// Print the target state as JSON
    Dump(TargetOpts),
    /// Inspect or reset the persistent state
    State(StateOpts),
    /// List managed targets
    Managed(ManagedOpts),
    /// Print version information
    Version,
}

impl Command {
    /// The subcommand's name, used for the log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "apply",
            Self::Add(_) => "add",
            Self::Diff(_) => "diff",
            Self::Status(_) => "status",
            Self::Merge(_) => "merge",
            Self::Destroy(_) => "destroy",
            Self::Forget(_) => "forget",
            Self::Chattr(_) => "chattr",
            Self::Archive(_) => "archive",
            Self::Dump(_) => "dump",
            Self::State(_) => "state",
            Self::Managed(_) => "managed",
            Self::Version => "version",
        }
    }
}

/// `--include` / `--exclude` entry kind filters.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterOpts {
    /// Only act on these entry kinds
    #[arg(short, long, value_enum, value_delimiter = ',')]
    pub include: Vec<EntryKind>,

    /// Never act on these entry kinds
    #[arg(short = 'x', long, value_enum, value_delimiter = ',')]
    pub exclude: Vec<EntryKind>,
}

impl FilterOpts {
    /// The filter these options describe.
    #[must_use]
    pub fn filter(&self) -> EntryFilter {
        EntryFilter::new(&self.include, &self.exclude)
    }
}

/// Options for commands that act on a selection of targets.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetOpts {
    /// Targets to act on (default: all)
    pub paths: Vec<PathBuf>,

    /// Do not descend into named directories
    #[arg(long = "no-recursive", action = ArgAction::SetFalse)]
    pub recursive: bool,

    /// Entry kind filters.
    #[command(flatten)]
    pub filter: FilterOpts,
}

/// Options for the `apply` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ApplyOpts {
    /// Target selection.
    #[command(flatten)]
    pub targets: TargetOpts,
}

/// Options for the `add` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct AddOpts {
    /// Destination entries to add
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Do not descend into directories
    #[arg(long = "no-recursive", action = ArgAction::SetFalse)]
    pub recursive: bool,

    /// Add the targets of symlinks instead of the links
    #[arg(short, long)]
    pub follow: bool,

    /// Mark added directories exact
    #[arg(long)]
    pub exact: bool,

    /// Encrypt added files
    #[arg(long)]
    pub encrypt: bool,

    /// Only create added files when missing
    #[arg(long)]
    pub create: bool,

    /// Add files as templates
    #[arg(short = 'T', long)]
    pub template: bool,

    /// Replace known template data values with template expressions
    #[arg(short, long)]
    pub autotemplate: bool,

    /// Entry kind filters.
    #[command(flatten)]
    pub filter: FilterOpts,
}

/// Options for commands that need at least one target.
#[derive(Args, Debug, Clone, Default)]
pub struct PathsOpts {
    /// Targets to act on
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Options for the `destroy` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct DestroyOpts {
    /// Targets to destroy
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Include everything beneath named directories
    #[arg(short, long)]
    pub recursive: bool,
}

/// Options for the `chattr` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ChattrOpts {
    /// Comma-separated attribute changes, such as `+template,-private`
    #[arg(allow_hyphen_values = true)]
    pub modifier: String,

    /// Targets to change
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Include everything beneath named directories
    #[arg(short, long)]
    pub recursive: bool,
}

/// Options for the `archive` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ArchiveOpts {
    /// Write to this file instead of standard output
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Archive format (default: from the output file name, else tar)
    #[arg(long, value_enum)]
    pub format: Option<ArchiveFormat>,

    /// Compress with gzip
    #[arg(short = 'z', long)]
    pub gzip: bool,

    /// Target selection.
    #[command(flatten)]
    pub targets: TargetOpts,
}

impl ArchiveOpts {
    /// The format implied by the flags and output name.
    #[must_use]
    pub fn resolved_format(&self) -> ArchiveFormat {
        if self.gzip {
            return ArchiveFormat::TarGz;
        }
        self.format
            .or_else(|| {
                self.output
                    .as_ref()
                    .and_then(|p| ArchiveFormat::from_file_name(&p.to_string_lossy()))
            })
            .unwrap_or_default()
    }
}

/// Options for the `state` subcommand.
#[derive(Args, Debug, Clone)]
pub struct StateOpts {
    /// Action to take.
    #[command(subcommand)]
    pub command: StateCommand,
}

/// `state` actions.
#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// Print every bucket as JSON
    Dump,
    /// Delete one bucket
    DeleteBucket {
        /// Bucket name, such as `entryState` or `scriptState`
        #[arg(long)]
        bucket: String,
    },
    /// Delete all history
    Reset,
}

/// Options for the `managed` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct ManagedOpts {
    /// Entry kind filters.
    #[command(flatten)]
    pub filter: FilterOpts,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::parse_from([
            "dotstate", "apply", "-n", "--force", "-k", "-S", "/src", "-D", "/home/u",
        ]);
        assert!(cli.global.dry_run);
        assert!(cli.global.force);
        assert!(cli.global.keep_going);
        assert_eq!(cli.global.source, Some(PathBuf::from("/src")));
        assert_eq!(cli.global.destination, Some(PathBuf::from("/home/u")));
    }

    #[test]
    fn override_data_is_global() {
        let cli = Cli::parse_from(["dotstate", "status", "--override-data", r#"{"a":1}"#]);
        assert_eq!(cli.global.override_data.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn apply_is_recursive_by_default() {
        let cli = Cli::parse_from(["dotstate", "apply", "/home/u/.config"]);
        assert!(matches!(&cli.command, Command::Apply(o) if o.targets.recursive));
        let cli = Cli::parse_from(["dotstate", "apply", "--no-recursive"]);
        assert!(matches!(&cli.command, Command::Apply(o) if !o.targets.recursive));
    }

    #[test]
    fn filters_take_comma_lists() {
        let cli = Cli::parse_from(["dotstate", "status", "-i", "files,dirs", "-x", "scripts"]);
        assert!(matches!(&cli.command, Command::Status(_)), "Expected Status command");
        if let Command::Status(opts) = cli.command {
            let filter = opts.filter.filter();
            assert!(filter.includes(EntryKind::Files));
            assert!(!filter.includes(EntryKind::Scripts));
            assert!(!filter.includes(EntryKind::Symlinks));
        }
    }

    #[test]
    fn chattr_accepts_leading_hyphen_modifiers() {
        let cli = Cli::parse_from(["dotstate", "chattr", "-private,+template", "/home/u/.a"]);
        assert!(matches!(&cli.command, Command::Chattr(_)), "Expected Chattr command");
        if let Command::Chattr(opts) = cli.command {
            assert_eq!(opts.modifier, "-private,+template");
            assert_eq!(opts.paths, [PathBuf::from("/home/u/.a")]);
        }
    }

    #[test]
    fn add_requires_paths() {
        assert!(Cli::try_parse_from(["dotstate", "add"]).is_err());
        let cli = Cli::parse_from(["dotstate", "add", "-T", "--exact", "/home/u/.ssh"]);
        assert!(matches!(
            &cli.command,
            Command::Add(o) if o.template && o.exact && o.recursive && !o.encrypt
        ));
    }

    #[test]
    fn state_subcommands() {
        let cli = Cli::parse_from(["dotstate", "state", "delete-bucket", "--bucket", "scriptState"]);
        assert!(matches!(
            &cli.command,
            Command::State(StateOpts {
                command: StateCommand::DeleteBucket { bucket },
            }) if bucket == "scriptState"
        ));
        let cli = Cli::parse_from(["dotstate", "state", "reset"]);
        assert!(matches!(
            &cli.command,
            Command::State(StateOpts {
                command: StateCommand::Reset
            })
        ));
    }

    #[test]
    fn archive_format_follows_flags_then_file_name() {
        let format = |args: &[&str]| {
            let argv = [&["dotstate", "archive"][..], args].concat();
            match Cli::parse_from(argv).command {
                Command::Archive(opts) => Some(opts.resolved_format()),
                _ => None,
            }
        };
        assert_eq!(format(&[]), Some(ArchiveFormat::Tar));
        assert_eq!(format(&["-o", "out.tgz"]), Some(ArchiveFormat::TarGz));
        assert_eq!(format(&["-z", "-o", "out.tar"]), Some(ArchiveFormat::TarGz));
        assert_eq!(
            format(&["--format", "tar", "-o", "x.tgz"]),
            Some(ArchiveFormat::Tar)
        );
    }

    #[test]
    fn parse_version() {
        let cli = Cli::parse_from(["dotstate", "version"]);
        assert!(matches!(cli.command, Command::Version));
        assert_eq!(cli.command.name(), "version");
    }

    #[test]
    fn command_names_match_the_subcommand() {
        let cli = Cli::parse_from(["dotstate", "destroy", "-r", "/home/u/.config"]);
        assert_eq!(cli.command.name(), "destroy");
        let cli = Cli::parse_from(["dotstate", "state", "dump"]);
        assert_eq!(cli.command.name(), "state");
    }
}
