//! Liveness and metrics HTTP endpoints.
//!
//! ```text
//! GET {healthz.path}  - 200 "ok" once ready, 503 otherwise
//! GET {metrics.path}  - Prometheus text exposition
//! ```
//!
//! When both endpoints share an address they are served by one listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::metrics::Metrics;
use crate::core::readiness::Readiness;
use crate::error::TransportError;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Router serving the liveness probe at `path`.
pub fn healthz_router(path: &str, readiness: Readiness) -> Router {
    Router::new()
        .route(path, get(healthz_handler))
        .with_state(readiness)
}

/// Router serving the metrics exposition at `path`.
pub fn metrics_router(path: &str, metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(metrics)
}

async fn healthz_handler(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        metrics.render(),
    )
}

/// Bind a TCP listener for the named endpoint.
pub async fn bind(
    name: &'static str,
    addr: SocketAddr,
) -> std::result::Result<TcpListener, TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::BindHttp { name, addr, source })?;

    let local = listener.local_addr().unwrap_or(addr);
    info!(endpoint = name, addr = %local, "listening on http");
    Ok(listener)
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::result::Result<(), TransportError> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| TransportError::Serve {
            name,
            reason: e.to_string(),
        })?;

    debug!(endpoint = name, "http server stopped");
    Ok(())
}
