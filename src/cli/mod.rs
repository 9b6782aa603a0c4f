//! Command-line interface.
//!
//! Flags override values from the optional `--config` file, which in turn
//! override built-in defaults.

pub mod output;

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use crate::core::config::{PluginConfig, TokenSourceKind};
use crate::core::lifecycle::Service;
use crate::error::Result;

/// cloudkms-plugin - Envelope-encryption KMS plugin.
#[derive(Parser, Debug)]
#[command(
    name = "cloudkms-plugin",
    about = "Envelope-encryption KMS plugin serving v1beta1 over a Unix socket",
    version
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CLOUDKMS_PLUGIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Fully-qualified key identity (overrides the split key flags)
    #[arg(long)]
    pub key_uri: Option<String>,

    /// Cloud project where the key ring is hosted
    #[arg(long)]
    pub project_id: Option<String>,

    /// Location of the key ring
    #[arg(long)]
    pub location_id: Option<String>,

    /// Key ring holding the key
    #[arg(long)]
    pub key_ring_id: Option<String>,

    /// Key used for crypto operations
    #[arg(long)]
    pub key_id: Option<String>,

    /// Path to the unix socket the plugin listens on
    #[arg(long = "path-to-unix-socket")]
    pub socket_path: Option<PathBuf>,

    /// Address for the metrics endpoint (host:port or :port)
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// URL path for the metrics endpoint
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Address for the liveness endpoint (host:port or :port)
    #[arg(long)]
    pub healthz_addr: Option<String>,

    /// URL path for the liveness endpoint
    #[arg(long)]
    pub healthz_path: Option<String>,

    /// Cloud KMS REST endpoint
    #[arg(long)]
    pub kms_endpoint: Option<String>,

    /// Where Cloud KMS access tokens come from
    #[arg(long, value_enum)]
    pub token_source: Option<TokenSourceKind>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Resolve the effective configuration.
    pub fn into_config(self) -> Result<PluginConfig> {
        let mut config = match &self.config {
            Some(path) => PluginConfig::load(path)?,
            None => PluginConfig::default(),
        };

        if self.key_uri.is_some() {
            config.key_uri = self.key_uri;
        }
        if self.project_id.is_some() {
            config.project_id = self.project_id;
        }
        if let Some(location) = self.location_id {
            config.location_id = location;
        }
        if self.key_ring_id.is_some() {
            config.key_ring_id = self.key_ring_id;
        }
        if self.key_id.is_some() {
            config.key_id = self.key_id;
        }
        if let Some(path) = self.socket_path {
            config.socket_path = path;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics.addr = addr;
        }
        if let Some(path) = self.metrics_path {
            config.metrics.path = path;
        }
        if let Some(addr) = self.healthz_addr {
            config.healthz.addr = addr;
        }
        if let Some(path) = self.healthz_path {
            config.healthz.path = path;
        }
        if let Some(endpoint) = self.kms_endpoint {
            config.gcp.endpoint = endpoint;
        }
        if let Some(source) = self.token_source {
            config.gcp.token_source = source;
        }

        Ok(config)
    }
}

/// Run the plugin until a shutdown signal or a server failure.
pub fn execute(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: PluginConfig) -> Result<()> {
    let mut running = Service::new(config).start().await?;

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        err = running.failed() => Some(err),
    };

    let stopped = running.shutdown().await;
    match failure {
        Some(err) => Err(err),
        None => stopped,
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_flags() {
        let cli = Cli::try_parse_from(["cloudkms-plugin"]).unwrap();
        assert_eq!(cli.into_config().unwrap(), PluginConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "cloudkms-plugin",
            "--project-id",
            "cloud-kms-lab",
            "--key-ring-id",
            "ring-01",
            "--key-id",
            "key-01",
            "--path-to-unix-socket",
            "/var/run/kms/socket.sock",
            "--healthz-addr",
            "127.0.0.1:9000",
            "--token-source",
            "gcloud",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(
            config.key_uri().unwrap(),
            "projects/cloud-kms-lab/locations/global/keyRings/ring-01/cryptoKeys/key-01"
        );
        assert_eq!(config.socket_path, PathBuf::from("/var/run/kms/socket.sock"));
        assert_eq!(config.healthz.addr, "127.0.0.1:9000");
        assert_eq!(config.metrics.addr, ":8080");
        assert_eq!(config.gcp.token_source, TokenSourceKind::Gcloud);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.toml");
        std::fs::write(
            &path,
            "key_uri = \"local:ephemeral\"\nsocket_path = \"/run/a.sock\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "cloudkms-plugin",
            "--config",
            path.to_str().unwrap(),
            "--path-to-unix-socket",
            "/run/b.sock",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(config.key_uri.as_deref(), Some("local:ephemeral"));
        assert_eq!(config.socket_path, PathBuf::from("/run/b.sock"));
    }

    #[test]
    fn test_unknown_token_source_rejected() {
        assert!(Cli::try_parse_from(["cloudkms-plugin", "--token-source", "aws"]).is_err());
    }
}
