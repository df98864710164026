//! In-memory stores: scratch state, mock-write overlays and the null store
//! used when writing into the source directory.
use std::collections::BTreeMap;

use super::{BUCKETS, PersistentState, StateError};

type Buckets = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// A store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryState {
    buckets: Buckets,
    read_only: bool,
}

impl MemoryState {
    /// An empty, writable store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty store that rejects writes.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            buckets: Buckets::new(),
            read_only: true,
        }
    }

    /// Snapshot every known bucket of `other` into a writable overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if `other` cannot be read.
    pub fn copy_from(other: &dyn PersistentState) -> Result<Self, StateError> {
        let mut buckets = Buckets::new();
        for bucket in BUCKETS {
            let entries: BTreeMap<String, Vec<u8>> = other.entries(bucket)?.into_iter().collect();
            if !entries.is_empty() {
                buckets.insert((*bucket).to_string(), entries);
            }
        }
        Ok(Self {
            buckets,
            read_only: false,
        })
    }

    const fn check_writable(&self) -> Result<(), StateError> {
        if self.read_only {
            Err(StateError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl PersistentState for MemoryState {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn set(&mut self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StateError> {
        self.check_writable()?;
        self.buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, bucket: &str, key: &str) -> Result<(), StateError> {
        self.check_writable()?;
        if let Some(b) = self.buckets.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn delete_bucket(&mut self, bucket: &str) -> Result<(), StateError> {
        self.check_writable()?;
        self.buckets.remove(bucket);
        Ok(())
    }

    fn entries(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>, StateError> {
        Ok(self
            .buckets
            .get(bucket)
            .map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}

/// A store that remembers nothing; reads are empty and writes vanish.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullState;

impl PersistentState for NullState {
    fn get(&self, _bucket: &str, _key: &str) -> Result<Option<Vec<u8>>, StateError> {
        Ok(None)
    }

    fn set(&mut self, _bucket: &str, _key: &str, _value: &[u8]) -> Result<(), StateError> {
        Ok(())
    }

    fn delete(&mut self, _bucket: &str, _key: &str) -> Result<(), StateError> {
        Ok(())
    }

    fn delete_bucket(&mut self, _bucket: &str) -> Result<(), StateError> {
        Ok(())
    }

    fn entries(&self, _bucket: &str) -> Result<Vec<(String, Vec<u8>)>, StateError> {
        Ok(Vec::new())
    }

    fn close(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}
