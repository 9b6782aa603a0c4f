//! Scripted KMS backends for exercising the plugin.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cloudkms_plugin::core::kms::{KmsBackend, KmsProvider, LocalKms};
use cloudkms_plugin::error::BackendError;

/// Local key that counts every call it receives.
#[derive(Debug)]
pub struct CountingKms {
    inner: LocalKms,
    pub encrypts: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub permission_checks: AtomicUsize,
}

impl CountingKms {
    pub fn new() -> Self {
        Self {
            inner: LocalKms::ephemeral(),
            encrypts: AtomicUsize::new(0),
            decrypts: AtomicUsize::new(0),
            permission_checks: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
            + self.decrypts.load(Ordering::SeqCst)
            + self.permission_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KmsBackend for CountingKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        self.encrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.encrypt(plaintext).await
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        self.inner.decrypt(ciphertext).await
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<String>, BackendError> {
        self.permission_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.test_permissions(permissions).await
    }

    fn key_uri(&self) -> &str {
        self.inner.key_uri()
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}

/// Backend that works during startup, then fails encrypt and decrypt with
/// a fixed API error once `arm` is called.
#[derive(Debug)]
pub struct FlakyKms {
    inner: LocalKms,
    armed: std::sync::atomic::AtomicBool,
    pub status: u16,
    pub message: String,
}

impl FlakyKms {
    pub fn new(status: u16, message: &str) -> Self {
        Self {
            inner: LocalKms::ephemeral(),
            armed: std::sync::atomic::AtomicBool::new(false),
            status,
            message: message.to_string(),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn fail(&self) -> Option<BackendError> {
        self.armed.load(Ordering::SeqCst).then(|| BackendError::Api {
            status: self.status,
            message: self.message.clone(),
        })
    }
}

#[async_trait]
impl KmsBackend for FlakyKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        match self.fail() {
            Some(e) => Err(e),
            None => self.inner.encrypt(plaintext).await,
        }
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        match self.fail() {
            Some(e) => Err(e),
            None => self.inner.decrypt(ciphertext).await,
        }
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<String>, BackendError> {
        self.inner.test_permissions(permissions).await
    }

    fn key_uri(&self) -> &str {
        self.inner.key_uri()
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}

/// Backend whose decrypt sleeps once `delay` is set, for abandoned calls.
#[derive(Debug)]
pub struct SlowKms {
    inner: LocalKms,
    delay_ms: AtomicUsize,
}

impl SlowKms {
    pub fn new() -> Self {
        Self {
            inner: LocalKms::ephemeral(),
            delay_ms: AtomicUsize::new(0),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl KmsBackend for SlowKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        self.inner.encrypt(plaintext).await
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.decrypt(ciphertext).await
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<String>, BackendError> {
        self.inner.test_permissions(permissions).await
    }

    fn key_uri(&self) -> &str {
        self.inner.key_uri()
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}

/// Backend that decrypts everything to the wrong plaintext.
#[derive(Debug)]
pub struct GarblingKms {
    inner: LocalKms,
}

impl GarblingKms {
    pub fn new() -> Self {
        Self {
            inner: LocalKms::ephemeral(),
        }
    }
}

#[async_trait]
impl KmsBackend for GarblingKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        self.inner.encrypt(plaintext).await
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        let mut plain = self.inner.decrypt(ciphertext).await?;
        plain.reverse();
        Ok(plain)
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<String>, BackendError> {
        self.inner.test_permissions(permissions).await
    }

    fn key_uri(&self) -> &str {
        self.inner.key_uri()
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}

/// Local key whose encrypt starts failing after `allowed` successful calls.
#[derive(Debug)]
pub struct FailAfterKms {
    inner: LocalKms,
    allowed: usize,
    encrypts: AtomicUsize,
    status: u16,
    message: String,
}

impl FailAfterKms {
    pub fn new(allowed: usize, status: u16, message: &str) -> Self {
        Self {
            inner: LocalKms::ephemeral(),
            allowed,
            encrypts: AtomicUsize::new(0),
            status,
            message: message.to_string(),
        }
    }

    /// Encrypt calls received so far, failed ones included.
    pub fn encrypts(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KmsBackend for FailAfterKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, BackendError> {
        if self.encrypts.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(BackendError::Api {
                status: self.status,
                message: self.message.clone(),
            });
        }
        self.inner.encrypt(plaintext).await
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BackendError> {
        self.inner.decrypt(ciphertext).await
    }

    async fn test_permissions(
        &self,
        permissions: &[&str],
    ) -> Result<BTreeSet<String>, BackendError> {
        self.inner.test_permissions(permissions).await
    }

    fn key_uri(&self) -> &str {
        self.inner.key_uri()
    }

    fn provider(&self) -> KmsProvider {
        KmsProvider::Local
    }
}
