//! `SQLite`-backed persistent state.
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension as _, params};

use super::{PersistentState, StateError, StateLock};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS state (
    bucket TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (bucket, key)
)";

/// A persistent state file.
#[derive(Debug)]
pub struct SqliteState {
    path: PathBuf,
    conn: Option<Connection>,
    lock: Option<StateLock>,
    read_only: bool,
}

impl SqliteState {
    /// Open (creating if writable) the database at `path`, holding a lock
    /// until [`close`](PersistentState::close) or drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired in time or the
    /// database cannot be opened.
    pub fn open(path: &Path, read_only: bool, timeout: Duration) -> Result<Self, StateError> {
        let lock = StateLock::acquire(path, !read_only, timeout)?;
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        let conn = Connection::open_with_flags(path, flags).map_err(|e| db_err(path, e))?;
        if !read_only {
            conn.execute_batch(SCHEMA).map_err(|e| db_err(path, e))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
            lock: Some(lock),
            read_only,
        })
    }

    fn conn(&self) -> Result<&Connection, StateError> {
        self.conn.as_ref().ok_or(StateError::Closed)
    }

    fn writable(&self) -> Result<&Connection, StateError> {
        if self.read_only {
            return Err(StateError::ReadOnly);
        }
        self.conn()
    }

    fn has_table(&self) -> Result<bool, StateError> {
        let conn = self.conn()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'state'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err(&self.path, e))?;
        Ok(found.is_some())
    }
}

fn db_err(path: &Path, source: rusqlite::Error) -> StateError {
    StateError::Database {
        path: path.display().to_string(),
        source,
    }
}

impl PersistentState for SqliteState {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        if !self.has_table()? {
            return Ok(None);
        }
        self.conn()?
            .query_row(
                "SELECT value FROM state WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err(&self.path, e))
    }

    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.writable()?
            .execute(
                "INSERT INTO state (bucket, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
                params![bucket, key, value],
            )
            .map_err(|e| db_err(&self.path, e))?;
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError> {
        self.writable()?
            .execute(
                "DELETE FROM state WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
            )
            .map_err(|e| db_err(&self.path, e))?;
        Ok(())
    }

    fn delete_bucket(&mut self, bucket: &str) -> Result<(), StateError> {
        self.writable()?
            .execute("DELETE FROM state WHERE bucket = ?1", params![bucket])
            .map_err(|e| db_err(&self.path, e))?;
        Ok(())
    }

    fn entries(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, StateError> {
        if !self.has_table()? {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM state WHERE bucket = ?1 ORDER BY key")
            .map_err(|e| db_err(&self.path, e))?;
        let rows = stmt
            .query_map(params![bucket], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| db_err(&self.path, e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| db_err(&self.path, e))
    }

    fn close(&mut self) -> Result<(), StateError> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| db_err(&self.path, e))?;
        }
        self.lock = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn set_overwrites_existing_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut s = SqliteState::open(&path, false, TIMEOUT).unwrap();
        s.set("b", "k", b"1").unwrap();
        s.set("b", "k", b"2").unwrap();
        assert_eq!(s.get("b", "k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(s.entries("b").unwrap().len(), 1);
    }

    #[test]
    fn close_releases_lock_and_rejects_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut s = SqliteState::open(&path, false, TIMEOUT).unwrap();
        s.close().unwrap();
        assert!(matches!(s.get("b", "k"), Err(StateError::Closed)));
        SqliteState::open(&path, false, TIMEOUT).unwrap();
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let mut s = SqliteState::open(&path, false, TIMEOUT).unwrap();
        s.delete("b", "missing").unwrap();
    }
}
