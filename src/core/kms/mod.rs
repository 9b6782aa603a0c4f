//! Remote key-management backends.
//!
//! The plugin is bound to exactly one key for its lifetime. The key
//! identity's format selects the backend:
//!
//! - `projects/.../cryptoKeys/...` → Google Cloud KMS (`gcp`)
//! - `local:ephemeral` or `local:<identity file>` → in-process age key (`local`)
//!
//! ## Adding a New Backend
//!
//! 1. Implement the `KmsBackend` trait in a new file
//! 2. Teach `KmsProvider::detect` its key format
//! 3. Construct it in `from_config`

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::core::config::PluginConfig;
use crate::core::constants;
use crate::core::types::Permission;
use crate::error::{BackendError, ConfigError, Result};

pub mod gcp;
pub mod local;
pub mod token;

pub use gcp::GcpKms;
pub use local::LocalKms;
pub use token::TokenSource;

/// Supported KMS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsProvider {
    Gcp,
    Local,
}

impl KmsProvider {
    /// Detect the provider from a key identity.
    ///
    /// - `projects/{p}/locations/{l}/keyRings/{r}/cryptoKeys/{k}` → GCP
    /// - `local:...` → Local
    pub fn detect(key: &str) -> Option<Self> {
        if let Some(rest) = key.strip_prefix(constants::LOCAL_KEY_PREFIX) {
            return (!rest.is_empty()).then_some(Self::Local);
        }
        if gcp::parse_resource_name(key).is_some() {
            return Some(Self::Gcp);
        }
        None
    }

    /// Provider display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gcp => "gcp",
            Self::Local => "local",
        }
    }
}

/// Client for the remote key-management service, bound to a single key.
///
/// Implementations are shared across concurrently served RPCs and must not
/// mutate their key binding after construction. Errors are returned as-is
/// to the caller; implementations never retry.
#[async_trait]
pub trait KmsBackend: Send + Sync + std::fmt::Debug {
    /// Encrypt raw bytes with the bound key.
    async fn encrypt(&self, plaintext: &[u8]) -> std::result::Result<Vec<u8>, BackendError>;

    /// Decrypt raw bytes with the bound key.
    ///
    /// Corrupted or truncated ciphertext must fail rather than yield a
    /// partial plaintext.
    async fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Vec<u8>, BackendError>;

    /// Return the subset of `permissions` the caller holds on the bound key.
    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> std::result::Result<BTreeSet<Permission>, BackendError>;

    /// The key identity this backend is bound to.
    fn key_uri(&self) -> &str;

    fn provider(&self) -> KmsProvider;
}

/// Build the backend selected by the configured key identity.
pub fn from_config(config: &PluginConfig) -> Result<Arc<dyn KmsBackend>> {
    let key_uri = config.key_uri()?;
    let provider =
        KmsProvider::detect(&key_uri).ok_or_else(|| ConfigError::InvalidKey(key_uri.clone()))?;

    debug!(key_uri = %key_uri, provider = provider.name(), "creating kms backend");

    let backend: Arc<dyn KmsBackend> = match provider {
        KmsProvider::Gcp => {
            let tokens = TokenSource::from_kind(config.gcp.token_source)?;
            Arc::new(GcpKms::new(key_uri, &config.gcp.endpoint, tokens)?)
        }
        KmsProvider::Local => Arc::new(LocalKms::from_key_uri(&key_uri)?),
    };
    Ok(backend)
}
