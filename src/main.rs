//! Command-line entry point for `dotstate`.
use anyhow::Result;
use clap::Parser;

use dotstate::{cli, commands, error, logging};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    logging::init_subscriber(args.verbose, args.command.name());
    let log = logging::Logger::new(args.command.name());

    match commands::run(&args, &log) {
        Err(e) if error::is_cancel(&e) => Ok(()),
        other => other,
    }
}
