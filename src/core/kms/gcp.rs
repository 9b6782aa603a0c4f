//! Google Cloud KMS backend.
//!
//! Talks to the Cloud KMS REST API (v1). Payloads travel base64-encoded in
//! JSON bodies; this module converts them back to raw bytes so callers only
//! ever see the bytes they sent.
//!
//! ## Requirements
//!
//! - The caller must hold `cloudkms.cryptoKeyVersions.useToEncrypt` and
//!   `cloudkms.cryptoKeyVersions.useToDecrypt` on the key
//! - Credentials come from the configured `TokenSource`

use std::collections::BTreeSet;

use ::base64::engine::general_purpose::STANDARD;
use ::base64::Engine;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{KmsBackend, KmsProvider, TokenSource};
use crate::core::types::{KeyUri, Permission};
use crate::error::BackendError;

/// Cloud KMS client bound to one crypto key.
#[derive(Debug)]
pub struct GcpKms {
    /// Full resource name: projects/*/locations/*/keyRings/*/cryptoKeys/*
    key_uri: KeyUri,
    endpoint: String,
    client: reqwest::Client,
    tokens: TokenSource,
}

#[derive(Serialize)]
struct EncryptBody {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptReply {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptBody {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptReply {
    // Omitted by the API when the plaintext is empty.
    #[serde(default)]
    plaintext: String,
}

#[derive(Serialize)]
struct PermissionsBody<'a> {
    permissions: &'a [&'a str],
}

#[derive(Deserialize)]
struct PermissionsReply {
    #[serde(default)]
    permissions: Vec<Permission>,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorStatus,
}

#[derive(Deserialize)]
struct ErrorStatus {
    message: String,
}

/// Split a crypto key resource name into (project, location, key ring, key).
pub fn parse_resource_name(name: &str) -> Option<(&str, &str, &str, &str)> {
    let parts: Vec<&str> = name.split('/').collect();

    if parts.len() != 8
        || parts[0] != "projects"
        || parts[2] != "locations"
        || parts[4] != "keyRings"
        || parts[6] != "cryptoKeys"
        || parts.iter().any(|p| p.is_empty())
    {
        return None;
    }

    Some((parts[1], parts[3], parts[5], parts[7]))
}

impl GcpKms {
    /// Create a client for `key_uri` against the given REST endpoint.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kms = GcpKms::new(
    ///     "projects/my-project/locations/global/keyRings/my-ring/cryptoKeys/my-key".to_string(),
    ///     "https://cloudkms.googleapis.com",
    ///     TokenSource::Metadata(Default::default()),
    /// )?;
    /// ```
    pub fn new(key_uri: KeyUri, endpoint: &str, tokens: TokenSource) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cloudkms-plugin/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            key_uri,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            tokens,
        })
    }

    /// POST `body` to `{endpoint}/v1/{key}:{verb}` and decode the JSON reply.
    async fn call<B, R>(&self, verb: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/v1/{}:{}", self.endpoint, self.key_uri, verb);
        let token = self.tokens.token(&self.client).await?;

        trace!(url = %url, "calling cloud kms");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorReply>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BackendError::Malformed(format!("{} response: {}", verb, e)))
    }
}

#[async_trait]
impl KmsBackend for GcpKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        debug!(key_uri = %self.key_uri, "encrypting with cloud kms");
        trace!(plaintext_len = plaintext.len(), "encrypt payload");

        let body = EncryptBody {
            plaintext: STANDARD.encode(plaintext),
        };
        let reply: EncryptReply = self.call("encrypt", &body).await?;

        let cipher = STANDARD
            .decode(reply.ciphertext)
            .map_err(|e| BackendError::Malformed(format!("invalid base64 ciphertext: {}", e)))?;

        trace!(ciphertext_len = cipher.len(), "encrypted with cloud kms");
        Ok(cipher)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        debug!(key_uri = %self.key_uri, "decrypting with cloud kms");
        trace!(ciphertext_len = ciphertext.len(), "decrypt payload");

        let body = DecryptBody {
            ciphertext: STANDARD.encode(ciphertext),
        };
        let reply: DecryptReply = self.call("decrypt", &body).await?;

        let plain = STANDARD
            .decode(reply.plaintext)
            .map_err(|e| BackendError::Malformed(format!("invalid base64 plaintext: {}", e)))?;

        trace!(plaintext_len = plain.len(), "decrypted with cloud kms");
        Ok(plain)
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<Permission>, BackendError> {
        debug!(key_uri = %self.key_uri, "testing iam permissions");

        let reply: PermissionsReply = self
            .call("testIamPermissions", &PermissionsBody { permissions })
            .await?;
        Ok(reply.permissions.into_iter().collect())
    }

    fn key_uri(&self) -> &str {
        &self.key_uri
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Gcp
    }
}
