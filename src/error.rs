//! Error types for the plugin.
//!
//! Startup errors (configuration, authorization, self-test, transport) are
//! fatal and bubble up to `main`. `BackendError` is also returned per request
//! and converted into a gRPC status without altering its message.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("caller is missing {permission} permission on {key_uri}")]
    Authorization {
        permission: String,
        key_uri: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{stage} self-test failed: {reason}")]
    SelfTest { stage: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Invalid or missing process configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {field}")]
    MissingField { field: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(
        "unrecognized key identity: {0} (expected projects/*/locations/*/keyRings/*/cryptoKeys/* or local:...)"
    )]
    InvalidKey(String),

    #[error("directory {} portion of socket path {} does not exist", dir.display(), path.display())]
    SocketDirMissing { dir: PathBuf, path: PathBuf },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[source] toml::de::Error),
}

/// A call to the remote key-management service failed.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The service answered with an error status.
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    #[error("kms request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to obtain access token: {0}")]
    Credentials(String),

    #[error("malformed kms response: {0}")]
    Malformed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

/// Binding, serving or dialing one of the plugin's listeners failed.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to delete the socket file {}: {source}", path.display())]
    CleanSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on unix socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind {name} endpoint on {addr}: {source}")]
    BindHttp {
        name: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open unix socket {}: {reason}", path.display())]
    Connect { path: PathBuf, reason: String },

    #[error("rpc call over unix socket failed: {0}")]
    Call(#[from] tonic::Status),

    #[error("rpc server stopped before accepting connections")]
    NotAccepting,

    #[error("{name} server failed: {reason}")]
    Serve { name: &'static str, reason: String },
}

impl From<BackendError> for tonic::Status {
    /// Keeps the backend's message verbatim; only the status code is derived.
    fn from(err: BackendError) -> Self {
        use tonic::Code;

        let code = match &err {
            BackendError::Api { status, .. } => match status {
                400 => Code::InvalidArgument,
                401 => Code::Unauthenticated,
                403 => Code::PermissionDenied,
                404 => Code::NotFound,
                429 => Code::ResourceExhausted,
                500..=599 => Code::Unavailable,
                _ => Code::Unknown,
            },
            BackendError::Http(_) | BackendError::Credentials(_) => Code::Unavailable,
            BackendError::Malformed(_) => Code::Internal,
            BackendError::EncryptionFailed(_) | BackendError::DecryptionFailed(_) => {
                Code::InvalidArgument
            }
        };
        tonic::Status::new(code, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
