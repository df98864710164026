//! Dotfile reconciliation engine.
//!
//! A source directory describes the desired state of a destination
//! directory (usually `$HOME`). Attributes such as permissions, template
//! rendering, encryption and script ordering are encoded in source file
//! names; the engine turns the source tree into a target state and
//! converges the destination on it, remembering what it last wrote so
//! that external edits are never silently overwritten.
//!
//! The public API is organised into layers, leaves first:
//!
//! - **[`path`]**, **[`attr`]**: path types and the file-name attribute codec
//! - **[`state`]**: the persistent bucket store behind conflict detection
//! - **[`source`]**, **[`template`]**, **[`encryption`]**, **[`target`]**:
//!   reading the source tree and computing target entries
//! - **[`system`]**: the filesystem effect boundary and its decorators
//! - **[`engine`]**: `add`, `apply`, `status` and `chattr`
//! - **[`commands`]**: subcommand orchestration over the engine
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod actual;
pub mod attr;
pub mod cli;
pub mod commands;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod entry_state;
pub mod error;
pub mod exec;
pub mod logging;
pub mod path;
pub mod source;
pub mod state;
pub mod system;
pub mod target;
pub mod template;
