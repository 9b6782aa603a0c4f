//! OAuth access tokens for Cloud KMS.
//!
//! Tokens are cached until shortly before they expire. The cache lock is
//! only held to read or replace the cached value, never while fetching.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::config::TokenSourceKind;
use crate::core::constants;
use crate::error::BackendError;

/// Default metadata server host; `GCE_METADATA_HOST` overrides it.
const METADATA_HOST: &str = "metadata.google.internal";

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh tokens this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// `gcloud` does not report expiry; assume a conservative lifetime.
const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Source of bearer tokens for the Cloud KMS API.
#[derive(Debug)]
pub enum TokenSource {
    /// A pre-minted token used as-is
    Static(String),
    /// GCE/GKE metadata server
    Metadata(TokenCache),
    /// `gcloud auth print-access-token`
    Gcloud(TokenCache),
}

/// Last token handed out and when it stops being usable.
#[derive(Debug, Default)]
pub struct TokenCache {
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl TokenSource {
    /// Build the token source for a configured kind.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Credentials` if `env` is selected and
    /// `GOOGLE_OAUTH_ACCESS_TOKEN` is unset or empty.
    pub fn from_kind(kind: TokenSourceKind) -> Result<Self, BackendError> {
        match kind {
            TokenSourceKind::Metadata => Ok(Self::Metadata(TokenCache::default())),
            TokenSourceKind::Gcloud => Ok(Self::Gcloud(TokenCache::default())),
            TokenSourceKind::Env => std::env::var(constants::ACCESS_TOKEN_ENV)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .map(|t| Self::Static(t.trim().to_string()))
                .ok_or_else(|| {
                    BackendError::Credentials(format!("{} is not set", constants::ACCESS_TOKEN_ENV))
                }),
        }
    }

    /// Return a usable access token, fetching a fresh one if needed.
    pub async fn token(&self, client: &reqwest::Client) -> Result<String, BackendError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Metadata(cache) => {
                if let Some(token) = cache.get() {
                    return Ok(token);
                }
                let (token, ttl) = fetch_metadata_token(client).await?;
                cache.put(&token, ttl);
                Ok(token)
            }
            Self::Gcloud(cache) => {
                if let Some(token) = cache.get() {
                    return Ok(token);
                }
                let token = fetch_gcloud_token().await?;
                cache.put(&token, GCLOUD_TOKEN_TTL);
                Ok(token)
            }
        }
    }
}

impl TokenCache {
    fn get(&self) -> Option<String> {
        let guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + REFRESH_MARGIN)
            .map(|t| t.value.clone())
    }

    fn put(&self, value: &str, ttl: Duration) {
        let mut guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(CachedToken {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        });
    }
}

async fn fetch_metadata_token(
    client: &reqwest::Client,
) -> Result<(String, Duration), BackendError> {
    let host = std::env::var("GCE_METADATA_HOST").unwrap_or_else(|_| METADATA_HOST.to_string());
    let url = format!("http://{}{}", host, METADATA_TOKEN_PATH);
    debug!(url = %url, "fetching access token from metadata server");

    let response = client
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| BackendError::Credentials(format!("metadata server unreachable: {}", e)))?;

    if !response.status().is_success() {
        return Err(BackendError::Credentials(format!(
            "metadata server returned {}",
            response.status()
        )));
    }

    let token: MetadataToken = response
        .json()
        .await
        .map_err(|e| BackendError::Credentials(format!("invalid metadata token: {}", e)))?;

    Ok((token.access_token, Duration::from_secs(token.expires_in)))
}

async fn fetch_gcloud_token() -> Result<String, BackendError> {
    debug!("fetching access token from gcloud");

    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| {
            BackendError::Credentials(format!(
                "gcloud CLI not found ({}). Install it from https://cloud.google.com/sdk/docs/install",
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("gcloud auth print-access-token failed");
        return Err(BackendError::Credentials(format!(
            "gcloud auth print-access-token failed: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(BackendError::Credentials(
            "gcloud returned an empty access token".to_string(),
        ));
    }
    Ok(token)
}
