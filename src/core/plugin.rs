//! Plugin core: the v1beta1 KeyManagementService.
//!
//! Every RPC is a thin wrapper around one backend call, timed and counted
//! at this boundary. The startup self-verification lives here too, since
//! it exercises exactly the same paths as real traffic.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::core::constants;
use crate::core::kms::KmsBackend;
use crate::core::metrics::{LatencyTimer, MetricsSink, Operation};
use crate::error::{BackendError, Error, Result};
use crate::proto::{
    DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, KeyManagementService,
    VersionRequest, VersionResponse, API_VERSION,
};

/// Serves Version, Encrypt and Decrypt against one bound key.
#[derive(Debug, Clone)]
pub struct Plugin {
    backend: Arc<dyn KmsBackend>,
    metrics: Arc<dyn MetricsSink>,
}

impl Plugin {
    pub fn new(backend: Arc<dyn KmsBackend>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { backend, metrics }
    }

    /// The key identity all operations use.
    pub fn key_uri(&self) -> &str {
        self.backend.key_uri()
    }

    /// Report protocol and runtime versions. Never touches the backend.
    pub fn version(&self, request: &VersionRequest) -> VersionResponse {
        if request.version != API_VERSION {
            debug!(requested = %request.version, "version request for a different api version");
        }
        VersionResponse {
            version: API_VERSION.to_string(),
            runtime_name: constants::RUNTIME_NAME.to_string(),
            runtime_version: constants::RUNTIME_VERSION.to_string(),
        }
    }

    /// Encrypt the request payload with the bound key.
    ///
    /// # Errors
    ///
    /// Returns the backend's error unchanged; it is also counted as an
    /// `encrypt` failure.
    pub async fn encrypt(
        &self,
        request: EncryptRequest,
    ) -> std::result::Result<EncryptResponse, BackendError> {
        debug!(key_uri = %self.key_uri(), "processing encrypt request");

        let cipher = self
            .measured(Operation::Encrypt, self.backend.encrypt(&request.plain))
            .await?;
        Ok(EncryptResponse { cipher })
    }

    /// Decrypt the request payload with the bound key.
    ///
    /// # Errors
    ///
    /// Returns the backend's error unchanged; it is also counted as a
    /// `decrypt` failure.
    pub async fn decrypt(
        &self,
        request: DecryptRequest,
    ) -> std::result::Result<DecryptResponse, BackendError> {
        debug!(key_uri = %self.key_uri(), "processing decrypt request");

        let plain = self
            .measured(Operation::Decrypt, self.backend.decrypt(&request.cipher))
            .await?;
        Ok(DecryptResponse { plain })
    }

    async fn measured<F>(
        &self,
        op: Operation,
        call: F,
    ) -> std::result::Result<Vec<u8>, BackendError>
    where
        F: std::future::Future<Output = std::result::Result<Vec<u8>, BackendError>>,
    {
        let _timer = LatencyTimer::start(self.metrics.as_ref(), op);
        let result = call.await;
        if result.is_err() {
            self.metrics.inc_failure(op);
        }
        result
    }

    /// Run the startup self-verification: permissions first, then an
    /// in-process encrypt/decrypt round trip.
    pub async fn verify(&self) -> Result<()> {
        self.check_permissions().await?;
        self.self_test().await
    }

    /// Fail unless the caller holds both encrypt and decrypt permissions on
    /// the bound key.
    pub async fn check_permissions(&self) -> Result<()> {
        info!(key_uri = %self.key_uri(), "validating iam permissions");

        let granted = self
            .backend
            .test_permissions(constants::REQUIRED_PERMISSIONS)
            .await?;

        if let Some(missing) = constants::REQUIRED_PERMISSIONS
            .iter()
            .find(|p| !granted.contains(**p))
        {
            return Err(Error::Authorization {
                permission: missing.to_string(),
                key_uri: self.key_uri().to_string(),
            });
        }

        info!(key_uri = %self.key_uri(), "validated iam permissions");
        Ok(())
    }

    /// Encrypt then decrypt a known plaintext directly through this core.
    pub async fn self_test(&self) -> Result<()> {
        info!("pinging kms");

        let encrypted = self
            .encrypt(EncryptRequest::new(constants::SELF_TEST_PLAINTEXT))
            .await?;
        let decrypted = self
            .decrypt(DecryptRequest::new(encrypted.cipher))
            .await?;
        check_round_trip("kms", &decrypted.plain)?;

        info!("successfully pinged kms");
        Ok(())
    }
}

/// Compare a round-tripped payload with the self-test plaintext.
pub(crate) fn check_round_trip(stage: &'static str, decrypted: &[u8]) -> Result<()> {
    if decrypted != constants::SELF_TEST_PLAINTEXT {
        return Err(Error::SelfTest {
            stage,
            reason: format!(
                "expected {} bytes of known plaintext, got {} different bytes",
                constants::SELF_TEST_PLAINTEXT.len(),
                decrypted.len()
            ),
        });
    }
    Ok(())
}

#[tonic::async_trait]
impl KeyManagementService for Plugin {
    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> std::result::Result<Response<VersionResponse>, Status> {
        Ok(Response::new(Plugin::version(self, request.get_ref())))
    }

    async fn encrypt(
        &self,
        request: Request<EncryptRequest>,
    ) -> std::result::Result<Response<EncryptResponse>, Status> {
        Plugin::encrypt(self, request.into_inner())
            .await
            .map(Response::new)
            .map_err(Status::from)
    }

    async fn decrypt(
        &self,
        request: Request<DecryptRequest>,
    ) -> std::result::Result<Response<DecryptResponse>, Status> {
        Plugin::decrypt(self, request.into_inner())
            .await
            .map(Response::new)
            .map_err(Status::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DECRYPT_PERMISSION;
    use crate::core::kms::LocalKms;
    use crate::core::metrics::Metrics;

    fn plugin_with(backend: LocalKms) -> (Plugin, Arc<Metrics>) {
        let metrics = Metrics::new();
        let plugin = Plugin::new(Arc::new(backend), metrics.clone());
        (plugin, metrics)
    }

    #[test]
    fn test_version() {
        let (plugin, metrics) = plugin_with(LocalKms::ephemeral());
        let response = plugin.version(&VersionRequest {
            version: "v1beta1".into(),
        });
        assert_eq!(response.version, "v1beta1");
        assert_eq!(response.runtime_name, "CloudKMS");
        assert_eq!(response.runtime_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(metrics.observations(Operation::Encrypt), 0);
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let (plugin, metrics) = plugin_with(LocalKms::ephemeral());

        let encrypted = plugin.encrypt(EncryptRequest::new("secret")).await.unwrap();
        let decrypted = plugin
            .decrypt(DecryptRequest::new(encrypted.cipher))
            .await
            .unwrap();

        assert_eq!(decrypted.plain, b"secret");
        assert_eq!(metrics.observations(Operation::Encrypt), 1);
        assert_eq!(metrics.observations(Operation::Decrypt), 1);
        assert_eq!(metrics.failures(Operation::Decrypt), 0);
    }

    #[tokio::test]
    async fn test_decryption_error_counted_once() {
        let (plugin, metrics) = plugin_with(LocalKms::ephemeral());

        let encrypted = plugin.encrypt(EncryptRequest::new("secret")).await.unwrap();
        let result = plugin
            .decrypt(DecryptRequest::new(encrypted.cipher[1..].to_vec()))
            .await;

        assert!(result.is_err());
        assert_eq!(metrics.failures(Operation::Decrypt), 1);
        assert_eq!(metrics.failures(Operation::Encrypt), 0);
        assert_eq!(metrics.observations(Operation::Decrypt), 1);
    }

    #[tokio::test]
    async fn test_verify_passes_with_permissions() {
        let (plugin, _) = plugin_with(LocalKms::ephemeral());
        plugin.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_encrypt_permission() {
        let (plugin, metrics) =
            plugin_with(LocalKms::ephemeral().with_granted(&[DECRYPT_PERMISSION]));

        match plugin.verify().await {
            Err(Error::Authorization { permission, .. }) => {
                assert_eq!(permission, constants::ENCRYPT_PERMISSION)
            }
            other => panic!("expected Authorization, got {:?}", other),
        }
        // Permission check runs before the round trip.
        assert_eq!(metrics.observations(Operation::Encrypt), 0);
    }

    #[test]
    fn test_check_round_trip_mismatch() {
        assert!(check_round_trip("kms", b"secret").is_ok());
        assert!(matches!(
            check_round_trip("kms", b"secre"),
            Err(Error::SelfTest { stage: "kms", .. })
        ));
    }
}
