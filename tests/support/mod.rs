//! Test support utilities for plugin integration tests.
//!
//! Provides an isolated plugin environment and scripted KMS backends.

#![allow(dead_code)]

pub mod assertions;
pub mod backends;
pub mod skip;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use backends::*;

use std::path::PathBuf;
use std::sync::Arc;

use cloudkms_plugin::core::config::PluginConfig;
use cloudkms_plugin::core::kms::{KmsBackend, LocalKms};
use cloudkms_plugin::core::lifecycle::{RunningService, Service};
use cloudkms_plugin::core::transport;
use cloudkms_plugin::proto::KeyManagementServiceClient;
use tempfile::TempDir;
use tonic::transport::Channel;

/// Test environment with an isolated socket directory.
///
/// HTTP endpoints bind ephemeral ports, so tests can run in parallel.
pub struct Test {
    /// Temporary directory holding the unix socket
    pub dir: TempDir,
}

impl Test {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        Self { dir }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("kms.sock")
    }

    /// Config with the socket in the temp dir and both endpoints on one
    /// ephemeral loopback port.
    pub fn config(&self) -> PluginConfig {
        let mut config = PluginConfig {
            key_uri: Some("local:ephemeral".into()),
            socket_path: self.socket_path(),
            ..PluginConfig::default()
        };
        config.metrics.addr = "127.0.0.1:0".into();
        config.healthz.addr = "127.0.0.1:0".into();
        config
    }

    /// Start the plugin against `backend` and wait until it is ready.
    pub async fn start_with(&self, backend: Arc<dyn KmsBackend>) -> RunningService {
        Service::new(self.config())
            .start_with_backend(backend)
            .await
            .expect("plugin failed to start")
    }

    /// Start the plugin with a fresh in-process key.
    pub async fn start(&self) -> RunningService {
        self.start_with(Arc::new(LocalKms::ephemeral())).await
    }

    pub async fn client(&self) -> KeyManagementServiceClient<Channel> {
        transport::connect(&self.socket_path())
            .await
            .expect("failed to connect to plugin socket")
    }
}

/// GET `path` from `addr` and return the status code and body.
pub async fn http_get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
    let url = format!("http://{}{}", addr, path);
    let response = reqwest::get(&url).await.expect("http request failed");
    let status = response.status().as_u16();
    let body = response.text().await.expect("failed to read body");
    (status, body)
}
