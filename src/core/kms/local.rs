//! In-process age backend.
//!
//! Serves `local:` key identities with an x25519 age key held in memory,
//! for development and tests where no cloud KMS is reachable. The age
//! format authenticates its payload, so altered or truncated ciphertext
//! fails to decrypt.
//!
//! - `local:ephemeral` generates a fresh key at startup; ciphertext does
//!   not survive a restart
//! - `local:<path>` loads an age identity (`AGE-SECRET-KEY-1...`) from a file

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::Path;

use ::age::x25519;
use async_trait::async_trait;
use tracing::trace;
use zeroize::Zeroizing;

use super::{KmsBackend, KmsProvider};
use crate::core::constants;
use crate::core::types::{KeyUri, Permission};
use crate::error::{BackendError, ConfigError, Result};

const EPHEMERAL: &str = "ephemeral";

/// age-backed key bound to a `local:` identity.
pub struct LocalKms {
    key_uri: KeyUri,
    identity: x25519::Identity,
    recipient: x25519::Recipient,
    granted: BTreeSet<Permission>,
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms")
            .field("key_uri", &self.key_uri)
            .field("recipient", &self.recipient.to_string())
            .field("granted", &self.granted)
            .finish()
    }
}

impl LocalKms {
    /// Fresh in-memory key granting both required permissions.
    pub fn ephemeral() -> Self {
        Self::with_identity(
            format!("{}{}", constants::LOCAL_KEY_PREFIX, EPHEMERAL),
            x25519::Identity::generate(),
        )
    }

    /// Build from a `local:` key identity.
    pub fn from_key_uri(key_uri: &str) -> Result<Self> {
        let target = key_uri
            .strip_prefix(constants::LOCAL_KEY_PREFIX)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::InvalidKey(key_uri.to_string()))?;

        if target == EPHEMERAL {
            return Ok(Self::ephemeral());
        }
        let identity = load_identity(Path::new(target))?;
        Ok(Self::with_identity(key_uri.to_string(), identity))
    }

    fn with_identity(key_uri: KeyUri, identity: x25519::Identity) -> Self {
        let recipient = identity.to_public();
        Self {
            key_uri,
            identity,
            recipient,
            granted: constants::REQUIRED_PERMISSIONS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Replace the set of permissions reported by `test_permissions`.
    pub fn with_granted(mut self, permissions: &[&str]) -> Self {
        self.granted = permissions.iter().map(|p| p.to_string()).collect();
        self
    }
}

fn load_identity(path: &Path) -> Result<x25519::Identity> {
    let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?);

    contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .and_then(|line| line.parse::<x25519::Identity>().ok())
        .ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "key_uri",
                reason: format!("no age identity found in {}", path.display()),
            }
            .into()
        })
}

#[async_trait]
impl KmsBackend for LocalKms {
    async fn encrypt(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, BackendError> {
        trace!(plaintext_len = plaintext.len(), "encrypting with local key");

        let encryptor = age::Encryptor::with_recipients(std::iter::once(
            &self.recipient as &dyn age::Recipient,
        ))
        .map_err(|e| BackendError::EncryptionFailed(e.to_string()))?;

        let mut encrypted = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| BackendError::EncryptionFailed(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| BackendError::EncryptionFailed(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| BackendError::EncryptionFailed(e.to_string()))?;

        trace!(ciphertext_len = encrypted.len(), "encrypted with local key");
        Ok(encrypted)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, BackendError> {
        trace!(ciphertext_len = ciphertext.len(), "decrypting with local key");

        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| BackendError::DecryptionFailed(e.to_string()))?;

        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|e| BackendError::DecryptionFailed(e.to_string()))?;

        let mut decrypted = Vec::new();
        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| BackendError::DecryptionFailed(e.to_string()))?;

        trace!(plaintext_len = decrypted.len(), "decrypted with local key");
        Ok(decrypted)
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> std::result::Result<BTreeSet<Permission>, BackendError> {
        Ok(permissions
            .iter()
            .filter(|p| self.granted.contains(**p))
            .map(|p| p.to_string())
            .collect())
    }

    fn key_uri(&self) -> &str {
        &self.key_uri
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}
