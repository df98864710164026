//! User configuration loaded from `dotstate.toml`.
//!
//! Every key is optional. Command-line flags are layered on top by the
//! command context.
pub mod toml_loader;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::encryption::{AgeEncryption, Encryption, GpgEncryption, NoEncryption};

pub use toml_loader::load_config;

/// Name of the configuration and cache directories.
pub const APP_NAME: &str = "dotstate";

/// Which encryption tool encrypted source files use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionKind {
    /// `age`.
    Age,
    /// `gpg`.
    Gpg,
}

/// `[age]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgeConfig {
    /// Binary to run.
    pub command: String,
    /// Identity files for decryption (and symmetric encryption).
    #[serde(deserialize_with = "one_or_many")]
    pub identity: Vec<String>,
    /// Recipients for encryption.
    #[serde(deserialize_with = "one_or_many")]
    pub recipient: Vec<String>,
    /// Encrypt with the identities instead of recipients.
    pub symmetric: bool,
    /// Extra arguments.
    pub args: Vec<String>,
}

impl Default for AgeConfig {
    fn default() -> Self {
        Self {
            command: "age".to_string(),
            identity: Vec::new(),
            recipient: Vec::new(),
            symmetric: false,
            args: Vec::new(),
        }
    }
}

/// `[gpg]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GpgConfig {
    /// Binary to run.
    pub command: String,
    /// Recipient key for encryption.
    pub recipient: Option<String>,
    /// Use symmetric encryption.
    pub symmetric: bool,
    /// Extra arguments.
    pub args: Vec<String>,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            command: "gpg".to_string(),
            recipient: None,
            symmetric: false,
            args: Vec::new(),
        }
    }
}

/// `[merge]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Merge tool.
    pub command: String,
    /// Arguments; templates over `destination`, `source` and `target`.
    pub args: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            command: "vimdiff".to_string(),
            args: Vec::new(),
        }
    }
}

/// `[template]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Engine options such as `missingkey=zero`.
    pub options: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Source directory; `~` is expanded.
    pub source_dir: Option<String>,
    /// Destination directory; defaults to the home directory.
    pub dest_dir: Option<String>,
    /// Umask applied to target permissions.
    pub umask: u32,
    /// Encryption tool.
    pub encryption: Option<EncryptionKind>,
    /// `age` settings.
    pub age: AgeConfig,
    /// `gpg` settings.
    pub gpg: GpgConfig,
    /// Merge tool settings.
    pub merge: MergeConfig,
    /// User template data.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Persistent state file; defaults to `dotstate.db` next to the config.
    pub persistent_state: Option<String>,
    /// Seconds to wait for the persistent state lock.
    pub lock_timeout: u64,
    /// Continue past per-target errors.
    pub keep_going: bool,
    /// Template engine settings.
    pub template: TemplateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: None,
            dest_dir: None,
            umask: 0o022,
            encryption: None,
            age: AgeConfig::default(),
            gpg: GpgConfig::default(),
            merge: MergeConfig::default(),
            data: serde_json::Map::new(),
            persistent_state: None,
            lock_timeout: 2,
            keep_going: false,
            template: TemplateConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration file at `path`; a missing file yields the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        load_config(path).with_context(|| format!("loading {}", path.display()))
    }

    /// The encryption backend selected by `encryption`.
    #[must_use]
    pub fn encryption(&self) -> Arc<dyn Encryption> {
        match self.encryption {
            Some(EncryptionKind::Age) => Arc::new(AgeEncryption::new(self.age.clone())),
            Some(EncryptionKind::Gpg) => Arc::new(GpgEncryption::new(self.gpg.clone())),
            None => Arc::new(NoEncryption),
        }
    }

    /// Persistent state lock timeout.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }
}

/// `$XDG_CONFIG_HOME/dotstate`, falling back to `~/.config/dotstate`.
#[must_use]
pub fn default_config_dir(home: &Path) -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map_or_else(|| home.join(".config"), PathBuf::from)
        .join(APP_NAME)
}

/// `~/.local/share/dotstate`, honouring `$XDG_DATA_HOME`.
#[must_use]
pub fn default_source_dir(home: &Path) -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map_or_else(|| home.join(".local").join("share"), PathBuf::from)
        .join(APP_NAME)
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
