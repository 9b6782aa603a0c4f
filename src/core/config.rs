//! Process configuration.
//!
//! Configuration comes from an optional TOML file (`--config`) with CLI flags
//! and environment variables layered on top. Everything is resolved and
//! validated before the plugin talks to the backend.

use serde::{Deserialize, Deserializer, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::constants;
use crate::core::kms::KmsProvider;
use crate::core::types::KeyUri;
use crate::error::{ConfigError, Result};

/// Plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// Fully-qualified key identity. Takes precedence over the split form below.
    pub key_uri: Option<KeyUri>,
    /// Cloud project where the key ring is hosted
    pub project_id: Option<String>,
    /// Location of the key ring
    pub location_id: String,
    /// Key ring holding the key
    pub key_ring_id: Option<String>,
    /// Key used for crypto operations
    pub key_id: Option<String>,
    /// Unix socket the RPC listener binds to
    pub socket_path: PathBuf,
    #[serde(deserialize_with = "metrics_endpoint")]
    pub metrics: EndpointConfig,
    #[serde(deserialize_with = "healthz_endpoint")]
    pub healthz: EndpointConfig,
    pub gcp: GcpConfig,
}

/// Address and URL path of an HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// `host:port`, or `:port` for all interfaces
    pub addr: String,
    pub path: String,
}

/// An endpoint table as written in the file; omitted keys keep their default.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialEndpoint {
    addr: Option<String>,
    path: Option<String>,
}

impl PartialEndpoint {
    fn or(self, default: EndpointConfig) -> EndpointConfig {
        EndpointConfig {
            addr: self.addr.unwrap_or(default.addr),
            path: self.path.unwrap_or(default.path),
        }
    }
}

fn metrics_endpoint<'de, D>(d: D) -> std::result::Result<EndpointConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialEndpoint::deserialize(d).map(|p| p.or(EndpointConfig::metrics()))
}

fn healthz_endpoint<'de, D>(d: D) -> std::result::Result<EndpointConfig, D::Error>
where
    D: Deserializer<'de>,
{
    PartialEndpoint::deserialize(d).map(|p| p.or(EndpointConfig::healthz()))
}

/// Google Cloud KMS client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GcpConfig {
    /// REST endpoint, overridable for emulators and tests
    pub endpoint: String,
    pub token_source: TokenSourceKind,
}

/// Where OAuth access tokens for Cloud KMS come from.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TokenSourceKind {
    /// GCE/GKE metadata server
    #[default]
    Metadata,
    /// `gcloud auth print-access-token`
    Gcloud,
    /// `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable
    Env,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            key_uri: None,
            project_id: None,
            location_id: constants::DEFAULT_LOCATION.to_string(),
            key_ring_id: None,
            key_id: None,
            socket_path: PathBuf::from(constants::DEFAULT_SOCKET_PATH),
            metrics: EndpointConfig::metrics(),
            healthz: EndpointConfig::healthz(),
            gcp: GcpConfig::default(),
        }
    }
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            endpoint: constants::DEFAULT_GCP_ENDPOINT.to_string(),
            token_source: TokenSourceKind::default(),
        }
    }
}

impl PluginConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadFile` if the file cannot be read, or
    /// `ConfigError::Parse` if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");

        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Resolve the key binding.
    ///
    /// An explicit `key_uri` wins; otherwise the resource name is assembled
    /// from project, location, key ring and key.
    pub fn key_uri(&self) -> Result<KeyUri> {
        if let Some(uri) = self.key_uri.as_deref().filter(|u| !u.is_empty()) {
            return Ok(uri.to_string());
        }

        let project = non_empty(&self.project_id).ok_or(ConfigError::MissingField {
            field: "project_id",
        })?;
        let key_ring = non_empty(&self.key_ring_id).ok_or(ConfigError::MissingField {
            field: "key_ring_id",
        })?;
        let key = non_empty(&self.key_id).ok_or(ConfigError::MissingField { field: "key_id" })?;

        Ok(format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            project, self.location_id, key_ring, key
        ))
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - A key identity resolves and its provider is recognized
    /// - Endpoint addresses parse and paths are absolute
    /// - The socket's parent directory exists
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` encountered.
    pub fn validate(&self) -> Result<()> {
        debug!("validating config");

        let key_uri = self.key_uri()?;
        if KmsProvider::detect(&key_uri).is_none() {
            return Err(ConfigError::InvalidKey(key_uri).into());
        }

        for (field, endpoint) in [("metrics", &self.metrics), ("healthz", &self.healthz)] {
            endpoint.socket_addr(field)?;
            if !endpoint.path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("path must start with '/': {}", endpoint.path),
                }
                .into());
            }
        }

        self.check_socket_dir()
    }

    /// Ensure the directory that will hold the Unix socket exists.
    pub fn check_socket_dir(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "socket_path",
            }
            .into());
        }

        let dir = match self.socket_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debug!(dir = %dir.display(), "unix socket directory");

        if !dir.is_dir() {
            return Err(ConfigError::SocketDirMissing {
                dir,
                path: self.socket_path.clone(),
            }
            .into());
        }
        Ok(())
    }
}

impl EndpointConfig {
    /// Default metrics endpoint.
    pub fn metrics() -> Self {
        Self {
            addr: constants::DEFAULT_METRICS_ADDR.to_string(),
            path: constants::DEFAULT_METRICS_PATH.to_string(),
        }
    }

    /// Default liveness endpoint.
    pub fn healthz() -> Self {
        Self {
            addr: constants::DEFAULT_HEALTHZ_ADDR.to_string(),
            path: constants::DEFAULT_HEALTHZ_PATH.to_string(),
        }
    }

    /// Parse the listen address, expanding `:port` to all IPv4 interfaces.
    pub fn socket_addr(&self, field: &'static str) -> Result<SocketAddr> {
        let invalid = |reason: String| ConfigError::InvalidValue { field, reason };

        if let Some(port) = self.addr.strip_prefix(':') {
            let port: u16 = port
                .parse()
                .map_err(|e| invalid(format!("invalid port in '{}': {}", self.addr, e)))?;
            return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
        }

        self.addr
            .parse()
            .map_err(|e| invalid(format!("invalid address '{}': {}", self.addr, e)).into())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
