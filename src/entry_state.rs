//! Durable fingerprints of written or observed entries.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The type recorded in an [`EntryState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStateKind {
    /// A directory.
    Dir,
    /// A regular file.
    File,
    /// A symbolic link.
    Symlink,
    /// An absent entry.
    Remove,
    /// A script that was run.
    Script,
}

/// A fingerprint of an entry: type, permission bits and a content hash.
///
/// Contents are carried alongside for diffing but are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryState {
    /// Entry type.
    #[serde(rename = "type")]
    pub kind: EntryStateKind,
    /// Permission bits; zero for symlinks, scripts and removed entries.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub mode: u32,
    /// Lowercase hex SHA-256 of the contents (or link target).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents_sha256: Option<String>,
    /// The contents themselves, when known.
    #[serde(skip)]
    pub contents: Option<Vec<u8>>,
    /// Set when the target should overwrite any external change.
    #[serde(skip)]
    pub overwrite: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(mode: &u32) -> bool {
    *mode == 0
}

impl EntryState {
    /// The state of an absent entry.
    #[must_use]
    pub const fn remove() -> Self {
        Self {
            kind: EntryStateKind::Remove,
            mode: 0,
            contents_sha256: None,
            contents: None,
            overwrite: false,
        }
    }

    /// A directory with the given permissions.
    #[must_use]
    pub const fn dir(mode: u32) -> Self {
        Self {
            kind: EntryStateKind::Dir,
            mode,
            contents_sha256: None,
            contents: None,
            overwrite: false,
        }
    }

    /// A regular file.
    #[must_use]
    pub fn file(mode: u32, contents: &[u8]) -> Self {
        Self {
            kind: EntryStateKind::File,
            mode,
            contents_sha256: Some(sha256_hex(contents)),
            contents: Some(contents.to_vec()),
            overwrite: false,
        }
    }

    /// A symbolic link; the hash covers the link target.
    #[must_use]
    pub fn symlink(linkname: &str) -> Self {
        Self {
            kind: EntryStateKind::Symlink,
            mode: 0,
            contents_sha256: Some(sha256_hex(linkname.as_bytes())),
            contents: Some(linkname.as_bytes().to_vec()),
            overwrite: false,
        }
    }

    /// A script.
    #[must_use]
    pub fn script(contents: &[u8]) -> Self {
        Self {
            kind: EntryStateKind::Script,
            mode: 0,
            contents_sha256: Some(sha256_hex(contents)),
            contents: Some(contents.to_vec()),
            overwrite: false,
        }
    }

    /// Compare type, mode and content hash.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.mode == other.mode
            && self.contents_sha256 == other.contents_sha256
    }

    /// The contents, if known.
    #[must_use]
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    /// Decode a persisted JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a valid entry state.
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Encode for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Whether two optional states describe the same thing, treating a
/// missing state as an absent entry.
#[must_use]
pub fn equivalent(a: Option<&EntryState>, b: Option<&EntryState>) -> bool {
    let removed = EntryState::remove();
    a.unwrap_or(&removed).equal(b.unwrap_or(&removed))
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
