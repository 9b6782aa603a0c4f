//! cloudkms-plugin - Envelope-encryption KMS plugin.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudkms_plugin::cli::output;
use cloudkms_plugin::cli::{execute, Cli};
use cloudkms_plugin::core::constants;
use cloudkms_plugin::error::{ConfigError, Error};

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber with env-filter support
    let filter = EnvFilter::try_from_env(constants::LOG_ENV).unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("cloudkms_plugin=debug")
        } else {
            EnvFilter::new("cloudkms_plugin=info")
        }
    });

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }

    if let Err(e) = execute(cli) {
        error!(error = %e, "kms plugin failed");

        let suggestion = match &e {
            Error::Authorization { .. } => {
                Some("grant roles/cloudkms.cryptoKeyEncrypterDecrypter on the key to the plugin's identity")
            }
            Error::Config(ConfigError::SocketDirMissing { .. }) => {
                Some("create the socket directory or pass --path-to-unix-socket")
            }
            Error::Config(ConfigError::MissingField { .. }) => {
                Some("pass --key-uri, or --project-id, --key-ring-id and --key-id")
            }
            Error::Config(ConfigError::InvalidKey(_)) => {
                Some("use projects/*/locations/*/keyRings/*/cryptoKeys/* or local:ephemeral")
            }
            _ => None,
        };

        output::error(&e.to_string());
        if let Some(hint) = suggestion {
            output::hint(hint);
        }
        std::process::exit(1);
    }
}
