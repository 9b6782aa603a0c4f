//! Unix socket transport for the gRPC service.
//!
//! Binding, serving and dialing the local socket. The accept loop signals
//! once it is being polled so the lifecycle can run its transport self-test
//! without guessing how long the server needs to come up.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tower::service_fn;
use tracing::{debug, info};

use crate::core::constants;
use crate::core::plugin::{check_round_trip, Plugin};
use crate::error::{Result, TransportError};
use crate::proto::{
    DecryptRequest, EncryptRequest, KeyManagementServiceClient, KeyManagementServiceServer,
};

/// Remove a stale socket file. A missing file is fine.
pub fn clean_socket(path: &Path) -> std::result::Result<(), TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TransportError::CleanSocket {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Clean any previous binding at `path` and listen on it.
///
/// Must be called from within a Tokio runtime.
pub fn bind(path: &Path) -> std::result::Result<UnixListener, TransportError> {
    clean_socket(path)?;

    let listener = UnixListener::bind(path).map_err(|source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "listening on unix domain socket");
    Ok(listener)
}

/// Incoming connection stream that fires `ready` on its first poll.
pub struct SignalOnAccept<S> {
    inner: S,
    ready: Option<oneshot::Sender<()>>,
}

impl<S> SignalOnAccept<S> {
    pub fn new(inner: S, ready: oneshot::Sender<()>) -> Self {
        Self {
            inner,
            ready: Some(ready),
        }
    }
}

impl<S: Stream + Unpin> Stream for SignalOnAccept<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Serve the plugin on `listener` until `shutdown` is cancelled.
pub async fn serve(
    plugin: Plugin,
    listener: UnixListener,
    ready: oneshot::Sender<()>,
    shutdown: CancellationToken,
) -> std::result::Result<(), TransportError> {
    let incoming = SignalOnAccept::new(UnixListenerStream::new(listener), ready);

    info!("serving grpc");
    Server::builder()
        .add_service(KeyManagementServiceServer::new(plugin))
        .serve_with_incoming_shutdown(incoming, shutdown.cancelled())
        .await
        .map_err(|e| TransportError::Serve {
            name: "grpc",
            reason: e.to_string(),
        })?;

    debug!("grpc server stopped");
    Ok(())
}

/// Open a client connection to the plugin's socket.
pub async fn connect(
    path: &Path,
) -> std::result::Result<KeyManagementServiceClient<Channel>, TransportError> {
    let socket: PathBuf = path.to_path_buf();

    // The URI is required by the endpoint builder; the connector ignores it.
    let channel = Endpoint::from_static("http://[::]:50051")
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket = socket.clone();
            async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
        }))
        .await
        .map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(KeyManagementServiceClient::new(channel))
}

/// Encrypt and decrypt the known plaintext through a gRPC client.
pub async fn round_trip(client: &mut KeyManagementServiceClient<Channel>) -> Result<()> {
    info!("pinging kms grpc");

    let encrypted = client
        .encrypt(EncryptRequest::new(constants::SELF_TEST_PLAINTEXT))
        .await
        .map_err(TransportError::Call)?
        .into_inner();
    let decrypted = client
        .decrypt(DecryptRequest::new(encrypted.cipher))
        .await
        .map_err(TransportError::Call)?
        .into_inner();
    check_round_trip("grpc", &decrypted.plain)?;

    info!("successfully pinged kms grpc");
    Ok(())
}
