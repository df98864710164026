//! Persistent bucket/key/value state used for conflict detection and
//! script run gating.
//!
//! One handle is opened per process in a [`StateMode`] chosen by the
//! command. Real files are `SQLite` databases guarded by a sibling lock file.
mod lock;
mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry_state::EntryState;
use crate::path::AbsPath;

pub use lock::StateLock;
pub use memory::{MemoryState, NullState};
pub use sqlite::SqliteState;

/// Bucket holding the last written [`EntryState`] per destination path.
pub const ENTRY_STATE_BUCKET: &str = "entryState";
/// Bucket holding the hash of the last applied config template.
pub const CONFIG_STATE_BUCKET: &str = "configState";
/// Bucket holding script run records keyed by content hash.
pub const SCRIPT_STATE_BUCKET: &str = "scriptState";

/// All buckets, in the order they are dumped.
pub const BUCKETS: &[&str] = &[CONFIG_STATE_BUCKET, ENTRY_STATE_BUCKET, SCRIPT_STATE_BUCKET];

/// Errors from the persistent state store.
#[derive(Error, Debug)]
pub enum StateError {
    /// The lock could not be acquired before the timeout.
    #[error("timeout obtaining persistent state lock, is another instance running?")]
    Locked,

    /// A write was attempted on a read-only handle.
    #[error("persistent state is read-only")]
    ReadOnly,

    /// The handle was used after [`PersistentState::close`].
    #[error("persistent state is closed")]
    Closed,

    /// The underlying database failed.
    #[error("persistent state database {path}: {source}")]
    Database {
        /// Path to the state file.
        path: String,
        /// Underlying error.
        source: rusqlite::Error,
    },

    /// The lock file or state directory could not be created.
    #[error("persistent state I/O {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A stored value could not be decoded.
    #[error("persistent state corrupt value in {bucket}/{key}: {source}")]
    Corrupt {
        /// Bucket containing the value.
        bucket: String,
        /// Key of the value.
        key: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// How the persistent state file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMode {
    /// In-memory only, discarded at exit.
    Empty,
    /// Real file, writes forbidden.
    ReadOnly,
    /// Real file loaded into memory; writes affect only the copy.
    ReadMockWrite,
    /// Real file, mutated.
    ReadWrite,
}

impl StateMode {
    /// Downgrade read-write to read-mock-write for dry runs so that history
    /// is visible but never modified.
    #[must_use]
    pub const fn for_dry_run(self, dry_run: bool) -> Self {
        match self {
            Self::ReadWrite if dry_run => Self::ReadMockWrite,
            other => other,
        }
    }
}

/// A bucket/key/value store.
pub trait PersistentState: std::fmt::Debug {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or cannot be written.
    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError>;

    /// Delete a value; deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or cannot be written.
    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError>;

    /// Delete every value in a bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or cannot be written.
    fn delete_bucket(&mut self, bucket: &str) -> Result<(), StateError>;

    /// All key/value pairs of a bucket, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn entries(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, StateError>;

    /// Flush and release any lock. Further use returns [`StateError::Closed`]
    /// for file-backed stores.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn close(&mut self) -> Result<(), StateError>;
}

/// Open the persistent state at `path` in `mode`.
///
/// A missing file in a read-only mode yields an empty store.
///
/// # Errors
///
/// Returns [`StateError::Locked`] if another process holds the lock past
/// `timeout`, or a database error if the file cannot be opened.
pub fn open(
    mode: StateMode,
    path: &Path,
    timeout: Duration,
) -> Result<Box<dyn PersistentState>, StateError> {
    tracing::debug!("opening persistent state {} ({mode:?})", path.display());
    match mode {
        StateMode::Empty => Ok(Box::new(MemoryState::new())),
        StateMode::ReadOnly if !path.exists() => Ok(Box::new(MemoryState::read_only())),
        StateMode::ReadMockWrite if !path.exists() => Ok(Box::new(MemoryState::new())),
        StateMode::ReadOnly => Ok(Box::new(SqliteState::open(path, true, timeout)?)),
        StateMode::ReadMockWrite => {
            let mut file = SqliteState::open(path, true, timeout)?;
            let memory = MemoryState::copy_from(&file)?;
            file.close()?;
            Ok(Box::new(memory))
        }
        StateMode::ReadWrite => Ok(Box::new(SqliteState::open(path, false, timeout)?)),
    }
}

/// Load the last written entry state for `path`.
///
/// # Errors
///
/// Returns an error if the store cannot be read or the value is corrupt.
pub fn get_entry_state(
    state: &dyn PersistentState,
    path: &AbsPath,
) -> Result<Option<EntryState>, StateError> {
    state
        .get(ENTRY_STATE_BUCKET, path.as_str())?
        .map(|data| {
            EntryState::from_json(&data).map_err(|source| StateError::Corrupt {
                bucket: ENTRY_STATE_BUCKET.to_string(),
                key: path.to_string(),
                source,
            })
        })
        .transpose()
}

/// Record the entry state for `path`.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub fn set_entry_state(
    state: &mut dyn PersistentState,
    path: &AbsPath,
    entry_state: &EntryState,
) -> Result<(), StateError> {
    let value = entry_state.to_json().map_err(|source| StateError::Corrupt {
        bucket: ENTRY_STATE_BUCKET.to_string(),
        key: path.to_string(),
        source,
    })?;
    state.set(ENTRY_STATE_BUCKET, path.as_str(), &value)
}

/// Delete the entry state of `path` and of everything beneath it.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub fn delete_entry_states(
    state: &mut dyn PersistentState,
    path: &AbsPath,
) -> Result<(), StateError> {
    let prefix = format!("{}/", path.as_str().trim_end_matches('/'));
    state.delete(ENTRY_STATE_BUCKET, path.as_str())?;
    for (key, _) in state.entries(ENTRY_STATE_BUCKET)? {
        if key.starts_with(&prefix) {
            state.delete(ENTRY_STATE_BUCKET, &key)?;
        }
    }
    Ok(())
}

/// A record of a script run, keyed by the hex hash of its contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptState {
    /// Target-relative name of the script.
    pub name: String,
    /// When it was run.
    pub run_at: chrono::DateTime<chrono::Utc>,
}

/// Record a script run under `key`, the hex hash of its contents.
///
/// # Errors
///
/// Returns an error if the record cannot be encoded or stored.
pub fn set_script_state(
    state: &mut dyn PersistentState,
    key: &str,
    record: &ScriptState,
) -> Result<(), StateError> {
    let value = serde_json::to_vec(record).map_err(|source| StateError::Corrupt {
        bucket: SCRIPT_STATE_BUCKET.to_string(),
        key: key.to_string(),
        source,
    })?;
    state.set(SCRIPT_STATE_BUCKET, key, &value)
}

/// Record of the last applied config template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigState {
    /// Hex SHA-256 of the config template contents.
    pub config_template_contents_sha256: String,
}

/// Dump every bucket as JSON, decoding values that are themselves JSON.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn dump(
    state: &dyn PersistentState,
) -> Result<BTreeMap<String, BTreeMap<String, serde_json::Value>>, StateError> {
    let mut out = BTreeMap::new();
    for bucket in BUCKETS {
        let mut values = BTreeMap::new();
        for (key, value) in state.entries(bucket)? {
            let json = serde_json::from_slice(&value).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&value).into_owned())
            });
            values.insert(key, json);
        }
        out.insert((*bucket).to_string(), values);
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn state_path() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        (dir, path)
    }

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn dry_run_downgrades_read_write() {
        assert_eq!(
            StateMode::ReadWrite.for_dry_run(true),
            StateMode::ReadMockWrite
        );
        assert_eq!(StateMode::ReadWrite.for_dry_run(false), StateMode::ReadWrite);
        assert_eq!(StateMode::ReadOnly.for_dry_run(true), StateMode::ReadOnly);
    }

    #[test]
    fn read_write_persists_across_handles() {
        let (_dir, path) = state_path();
        {
            let mut s = open(StateMode::ReadWrite, &path, TIMEOUT).unwrap();
            s.set(ENTRY_STATE_BUCKET, "/home/u/.bashrc", b"{}").unwrap();
            s.close().unwrap();
        }
        let s = open(StateMode::ReadOnly, &path, TIMEOUT).unwrap();
        assert_eq!(
            s.get(ENTRY_STATE_BUCKET, "/home/u/.bashrc").unwrap(),
            Some(b"{}".to_vec())
        );
    }

    #[test]
    fn read_only_rejects_writes() {
        let (_dir, path) = state_path();
        open(StateMode::ReadWrite, &path, TIMEOUT)
            .unwrap()
            .close()
            .unwrap();
        let mut s = open(StateMode::ReadOnly, &path, TIMEOUT).unwrap();
        assert!(matches!(
            s.set(ENTRY_STATE_BUCKET, "k", b"v"),
            Err(StateError::ReadOnly)
        ));
    }

    #[test]
    fn read_only_missing_file_is_empty() {
        let (_dir, path) = state_path();
        let mut s = open(StateMode::ReadOnly, &path, TIMEOUT).unwrap();
        assert_eq!(s.get(ENTRY_STATE_BUCKET, "k").unwrap(), None);
        assert!(s.set(ENTRY_STATE_BUCKET, "k", b"v").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn mock_write_sees_history_but_never_writes_back() {
        let (_dir, path) = state_path();
        {
            let mut s = open(StateMode::ReadWrite, &path, TIMEOUT).unwrap();
            s.set(SCRIPT_STATE_BUCKET, "abc", b"1").unwrap();
            s.close().unwrap();
        }
        {
            let mut s = open(StateMode::ReadMockWrite, &path, TIMEOUT).unwrap();
            assert_eq!(s.get(SCRIPT_STATE_BUCKET, "abc").unwrap(), Some(b"1".to_vec()));
            s.set(SCRIPT_STATE_BUCKET, "def", b"2").unwrap();
            s.delete(SCRIPT_STATE_BUCKET, "abc").unwrap();
            assert_eq!(s.get(SCRIPT_STATE_BUCKET, "abc").unwrap(), None);
        }
        let s = open(StateMode::ReadOnly, &path, TIMEOUT).unwrap();
        assert_eq!(s.get(SCRIPT_STATE_BUCKET, "abc").unwrap(), Some(b"1".to_vec()));
        assert_eq!(s.get(SCRIPT_STATE_BUCKET, "def").unwrap(), None);
    }

    #[test]
    fn empty_mode_never_touches_disk() {
        let (_dir, path) = state_path();
        let mut s = open(StateMode::Empty, &path, TIMEOUT).unwrap();
        s.set(ENTRY_STATE_BUCKET, "k", b"v").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn second_writer_times_out_with_friendly_message() {
        let (_dir, path) = state_path();
        let _first = open(StateMode::ReadWrite, &path, TIMEOUT).unwrap();
        let err = open(StateMode::ReadWrite, &path, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, StateError::Locked));
        assert!(err.to_string().contains("is another instance running?"));
    }

    #[test]
    fn entry_state_helpers_round_trip() {
        let mut s = MemoryState::new();
        let path = AbsPath::new("/home/u/.vimrc").unwrap();
        set_entry_state(&mut s, &path, &EntryState::file(0o644, b"set nu\n")).unwrap();
        let got = get_entry_state(&s, &path).unwrap().unwrap();
        assert!(got.equal(&EntryState::file(0o644, b"set nu\n")));
    }

    #[test]
    fn deleting_entry_states_takes_children_but_not_siblings() {
        let mut s = MemoryState::new();
        for key in ["/h/.vim", "/h/.vim/a", "/h/.vim/b/c", "/h/.vimrc"] {
            let path = AbsPath::new(key).unwrap();
            set_entry_state(&mut s, &path, &EntryState::remove()).unwrap();
        }
        delete_entry_states(&mut s, &AbsPath::new("/h/.vim").unwrap()).unwrap();
        let keys: Vec<_> = s
            .entries(ENTRY_STATE_BUCKET)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["/h/.vimrc"]);
    }

    #[test]
    fn corrupt_entry_state_is_an_error() {
        let mut s = MemoryState::new();
        s.set(ENTRY_STATE_BUCKET, "/x", b"not json").unwrap();
        let err = get_entry_state(&s, &AbsPath::new("/x").unwrap()).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn dump_decodes_json_values() {
        let mut s = MemoryState::new();
        s.set(ENTRY_STATE_BUCKET, "/x", br#"{"type":"remove"}"#).unwrap();
        let d = dump(&s).unwrap();
        assert_eq!(d[ENTRY_STATE_BUCKET]["/x"]["type"], "remove");
        assert!(d[SCRIPT_STATE_BUCKET].is_empty());
    }
}
