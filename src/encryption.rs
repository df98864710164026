//! Encryption of source files through external `age` or `gpg` binaries.
//!
//! Both tools are driven over stdin/stdout through
//! [`System::idempotent_cmd_output`], so decryption still works under
//! `--dry-run` and archive export.
use std::fmt;

use thiserror::Error;

use crate::config::{AgeConfig, GpgConfig};
use crate::exec::Cmd;
use crate::system::{System, SystemError};

/// Errors from encrypting or decrypting.
#[derive(Error, Debug)]
pub enum EncryptionError {
    /// An encrypted source file was found but no tool is configured.
    #[error("no encryption configured, set encryption = \"age\" or \"gpg\"")]
    NotConfigured,

    /// The tool failed.
    #[error(transparent)]
    Command(#[from] SystemError),
}

/// A symmetric or asymmetric encryption scheme.
pub trait Encryption: Send + Sync + fmt::Debug {
    /// Decrypt `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is missing or rejects the input.
    fn decrypt(&self, system: &dyn System, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// Encrypt `plaintext`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is missing or rejects the input.
    fn encrypt(&self, system: &dyn System, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// File name suffix of encrypted source files.
    fn encrypted_suffix(&self) -> &str;
}

/// Rejects every operation; used when nothing is configured.
#[derive(Debug, Default)]
pub struct NoEncryption;

impl Encryption for NoEncryption {
    fn decrypt(&self, _system: &dyn System, _ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Err(EncryptionError::NotConfigured)
    }

    fn encrypt(&self, _system: &dyn System, _plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Err(EncryptionError::NotConfigured)
    }

    fn encrypted_suffix(&self) -> &'static str {
        ""
    }
}

/// `age` with identity files and recipients.
#[derive(Debug, Clone)]
pub struct AgeEncryption {
    config: AgeConfig,
}

impl AgeEncryption {
    /// Build from configuration.
    #[must_use]
    pub const fn new(config: AgeConfig) -> Self {
        Self { config }
    }

    fn identity_args(&self) -> Vec<String> {
        self.config
            .identity
            .iter()
            .flat_map(|i| ["--identity".to_string(), i.clone()])
            .collect()
    }
}

impl Encryption for AgeEncryption {
    fn decrypt(&self, system: &dyn System, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cmd = Cmd::new(&self.config.command)
            .args(["--decrypt"])
            .args(self.identity_args())
            .args(self.config.args.iter().cloned())
            .stdin(ciphertext.to_vec());
        Ok(system.idempotent_cmd_output(&cmd)?.stdout)
    }

    fn encrypt(&self, system: &dyn System, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut cmd = Cmd::new(&self.config.command).args(["--armor", "--encrypt"]);
        cmd = if self.config.symmetric {
            cmd.args(self.identity_args())
        } else {
            cmd.args(
                self.config
                    .recipient
                    .iter()
                    .flat_map(|r| ["--recipient".to_string(), r.clone()]),
            )
        };
        let cmd = cmd
            .args(self.config.args.iter().cloned())
            .stdin(plaintext.to_vec());
        Ok(system.idempotent_cmd_output(&cmd)?.stdout)
    }

    fn encrypted_suffix(&self) -> &'static str {
        ".age"
    }
}

/// `gpg` in armor mode.
#[derive(Debug, Clone)]
pub struct GpgEncryption {
    config: GpgConfig,
}

impl GpgEncryption {
    /// Build from configuration.
    #[must_use]
    pub const fn new(config: GpgConfig) -> Self {
        Self { config }
    }
}

impl Encryption for GpgEncryption {
    fn decrypt(&self, system: &dyn System, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let cmd = Cmd::new(&self.config.command)
            .args(["--decrypt"])
            .args(self.config.args.iter().cloned())
            .stdin(ciphertext.to_vec());
        Ok(system.idempotent_cmd_output(&cmd)?.stdout)
    }

    fn encrypt(&self, system: &dyn System, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut cmd = Cmd::new(&self.config.command).args(["--armor", "--encrypt"]);
        if let Some(recipient) = &self.config.recipient {
            cmd = cmd.args(["--recipient", recipient.as_str()]);
        }
        if self.config.symmetric {
            cmd = cmd.args(["--symmetric"]);
        }
        let cmd = cmd
            .args(self.config.args.iter().cloned())
            .stdin(plaintext.to_vec());
        Ok(system.idempotent_cmd_output(&cmd)?.stdout)
    }

    fn encrypted_suffix(&self) -> &'static str {
        ".asc"
    }
}

/// A reversible byte transform for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct XorEncryption;

#[cfg(test)]
impl Encryption for XorEncryption {
    fn decrypt(&self, _system: &dyn System, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(ciphertext.iter().map(|b| b ^ 0x5a).collect())
    }

    fn encrypt(&self, _system: &dyn System, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(plaintext.iter().map(|b| b ^ 0x5a).collect())
    }

    fn encrypted_suffix(&self) -> &'static str {
        ".xor"
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::system::test_helpers::MemSystem;

    fn last_run(system: &MemSystem) -> String {
        system.runs.lock().unwrap().last().cloned().unwrap()
    }

    #[test]
    fn age_decrypt_passes_identities() {
        let system = MemSystem::new();
        let age = AgeEncryption::new(AgeConfig {
            identity: vec!["/k/key.txt".into()],
            ..AgeConfig::default()
        });
        age.decrypt(&system, b"x").unwrap();
        assert_eq!(last_run(&system), "age --decrypt --identity /k/key.txt");
    }

    #[test]
    fn age_encrypt_uses_recipients() {
        let system = MemSystem::new();
        let age = AgeEncryption::new(AgeConfig {
            recipient: vec!["age1abc".into()],
            ..AgeConfig::default()
        });
        age.encrypt(&system, b"x").unwrap();
        assert_eq!(last_run(&system), "age --armor --encrypt --recipient age1abc");
        assert_eq!(age.encrypted_suffix(), ".age");
    }

    #[test]
    fn gpg_encrypt_symmetric_with_extra_args() {
        let system = MemSystem::new();
        let gpg = GpgEncryption::new(GpgConfig {
            symmetric: true,
            args: vec!["--quiet".into()],
            ..GpgConfig::default()
        });
        gpg.encrypt(&system, b"x").unwrap();
        assert_eq!(last_run(&system), "gpg --armor --encrypt --symmetric --quiet");
    }

    #[test]
    fn unconfigured_encryption_fails() {
        let err = NoEncryption.decrypt(&MemSystem::new(), b"x").unwrap_err();
        assert!(matches!(err, EncryptionError::NotConfigured));
    }

    #[test]
    fn xor_round_trips() {
        let system = MemSystem::new();
        let ciphertext = XorEncryption.encrypt(&system, b"secret").unwrap();
        assert_ne!(ciphertext, b"secret");
        assert_eq!(XorEncryption.decrypt(&system, &ciphertext).unwrap(), b"secret");
    }
}
