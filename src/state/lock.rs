//! Advisory lock on the persistent state file.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use super::StateError;

const LOCK_POLL: Duration = Duration::from_millis(25);

/// A held lock on `<state file>.lock`; released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Acquire the lock, polling until `timeout` elapses.
    ///
    /// Readers take a shared lock, writers an exclusive one.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Locked`] on timeout or [`StateError::Io`] if
    /// the lock file cannot be opened.
    pub fn acquire(state_path: &Path, exclusive: bool, timeout: Duration) -> Result<Self, StateError> {
        let path = lock_path(state_path);
        let io_err = |source| StateError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;
        let start = Instant::now();
        loop {
            let attempt = if exclusive {
                file.try_lock_exclusive()
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => {
                    tracing::debug!("acquired state lock {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(_) if start.elapsed() >= timeout => return Err(StateError::Locked),
                Err(_) => thread::sleep(LOCK_POLL),
            }
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(state_path: &Path) -> PathBuf {
    let mut name = state_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
