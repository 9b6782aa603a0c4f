//! Constants used throughout the plugin.
//!
//! Centralizes protocol identifiers, IAM permission names and defaults.

/// Runtime name reported by `Version`.
pub const RUNTIME_NAME: &str = "CloudKMS";

/// Runtime version reported by `Version`.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// IAM permission required to encrypt with the bound key.
pub const ENCRYPT_PERMISSION: &str = "cloudkms.cryptoKeyVersions.useToEncrypt";

/// IAM permission required to decrypt with the bound key.
pub const DECRYPT_PERMISSION: &str = "cloudkms.cryptoKeyVersions.useToDecrypt";

/// Permissions checked before the plugin may serve traffic.
pub const REQUIRED_PERMISSIONS: &[&str] = &[ENCRYPT_PERMISSION, DECRYPT_PERMISSION];

/// Known plaintext used by the startup round-trip self-tests.
pub const SELF_TEST_PLAINTEXT: &[u8] = b"secret";

/// Default Unix socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/kms-plugin.socket";

/// Default Cloud KMS location.
pub const DEFAULT_LOCATION: &str = "global";

pub const DEFAULT_METRICS_ADDR: &str = ":8080";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_HEALTHZ_ADDR: &str = ":8081";
pub const DEFAULT_HEALTHZ_PATH: &str = "/healthz";

/// Cloud KMS REST endpoint.
pub const DEFAULT_GCP_ENDPOINT: &str = "https://cloudkms.googleapis.com";

/// Environment variable consulted for log filter directives.
pub const LOG_ENV: &str = "CLOUDKMS_PLUGIN_LOG";

/// Environment variable holding a pre-minted OAuth access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Prefix of key identities served by the in-process age backend.
pub const LOCAL_KEY_PREFIX: &str = "local:";
