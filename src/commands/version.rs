//! Command: print version information.
use std::io::Write;

use anyhow::{Context as _, Result};

/// The version string, overridable at build time with `DOTSTATE_VERSION`.
pub const VERSION: &str = match option_env!("DOTSTATE_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Print the version.
///
/// # Errors
///
/// Returns an error if `out` cannot be written.
pub fn run(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "dotstate {VERSION}").context("writing version")
}
