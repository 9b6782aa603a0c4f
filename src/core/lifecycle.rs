//! Service lifecycle: startup sequencing, readiness gating and shutdown.
//!
//! ```text
//! Constructing → Verifying → Listening → VerifyingOverTransport → Ready
//!                                                                   ↓
//!                                               Stopped ← ShuttingDown
//! ```
//!
//! Any failure before `Ready` aborts startup. The liveness and metrics
//! endpoints only come up once the plugin has served a full round trip
//! over its own socket, so an orchestrator never sees a healthy plugin that
//! cannot actually serve requests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::config::PluginConfig;
use crate::core::http;
use crate::core::kms::{self, KmsBackend};
use crate::core::metrics::Metrics;
use crate::core::plugin::Plugin;
use crate::core::readiness::Readiness;
use crate::core::transport;
use crate::error::{Error, Result, TransportError};

/// How long shutdown waits for servers to drain before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type TaskResult = (&'static str, std::result::Result<(), TransportError>);

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Constructing,
    Verifying,
    Listening,
    VerifyingOverTransport,
    Ready,
    ShuttingDown,
    Stopped,
}

fn transition(state: &mut LifecycleState, next: LifecycleState) {
    debug_assert!(next > *state, "lifecycle cannot go from {:?} to {:?}", state, next);
    info!(from = ?*state, to = ?next, "lifecycle transition");
    *state = next;
}

/// A plugin that has not started yet.
#[derive(Debug)]
pub struct Service {
    config: PluginConfig,
    metrics: Arc<Metrics>,
    readiness: Readiness,
    state: LifecycleState,
}

/// A plugin that passed every startup check and is serving traffic.
#[derive(Debug)]
pub struct RunningService {
    state: LifecycleState,
    socket_path: PathBuf,
    readiness: Readiness,
    metrics: Arc<Metrics>,
    healthz_addr: SocketAddr,
    metrics_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: JoinSet<TaskResult>,
}

impl Service {
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            metrics: Metrics::new(),
            readiness: Readiness::new(),
            state: LifecycleState::Constructing,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Readiness flag shared with the liveness endpoint.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    /// Validate configuration, build the configured backend and start.
    pub async fn start(self) -> Result<RunningService> {
        self.config.validate()?;
        let backend = kms::from_config(&self.config)?;
        self.start_with_backend(backend).await
    }

    /// Start with an already constructed backend.
    ///
    /// Runs the full startup sequence; returns only once the plugin is ready.
    pub async fn start_with_backend(
        mut self,
        backend: Arc<dyn KmsBackend>,
    ) -> Result<RunningService> {
        let healthz_addr = self.config.healthz.socket_addr("healthz")?;
        let metrics_addr = self.config.metrics.socket_addr("metrics")?;
        self.config.check_socket_dir()?;

        info!(
            key_uri = %backend.key_uri(),
            provider = backend.provider().name(),
            socket = %self.config.socket_path.display(),
            "starting kms plugin"
        );
        let plugin = Plugin::new(backend, self.metrics.clone());

        transition(&mut self.state, LifecycleState::Verifying);
        plugin.verify().await?;

        transition(&mut self.state, LifecycleState::Listening);
        let socket_path = self.config.socket_path.clone();
        let listener = transport::bind(&socket_path)?;

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        {
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                ("grpc", transport::serve(plugin, listener, ready_tx, shutdown).await)
            });
        }

        transition(&mut self.state, LifecycleState::VerifyingOverTransport);
        if let Err(e) = verify_over_transport(&socket_path, ready_rx).await {
            abort_startup(shutdown, tasks, &socket_path).await;
            return Err(e);
        }

        let endpoints = match self
            .serve_endpoints(healthz_addr, metrics_addr, &shutdown, &mut tasks)
            .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                abort_startup(shutdown, tasks, &socket_path).await;
                return Err(e);
            }
        };

        info!(
            healthz = %endpoints.0,
            metrics = %endpoints.1,
            "kms plugin ready"
        );

        Ok(RunningService {
            state: self.state,
            socket_path,
            readiness: self.readiness,
            metrics: self.metrics,
            healthz_addr: endpoints.0,
            metrics_addr: endpoints.1,
            shutdown,
            tasks,
        })
    }

    /// Bind the liveness and metrics endpoints, publish readiness, then serve.
    ///
    /// Readiness is only published once both listeners are bound, so a bind
    /// failure leaves the plugin not ready.
    async fn serve_endpoints(
        &mut self,
        healthz_addr: SocketAddr,
        metrics_addr: SocketAddr,
        shutdown: &CancellationToken,
        tasks: &mut JoinSet<TaskResult>,
    ) -> Result<(SocketAddr, SocketAddr)> {
        let healthz = http::healthz_router(&self.config.healthz.path, self.readiness.clone());
        let metrics = http::metrics_router(&self.config.metrics.path, self.metrics.clone());

        if healthz_addr == metrics_addr {
            let listener = http::bind("healthz+metrics", healthz_addr).await?;
            let bound = listener.local_addr().unwrap_or(healthz_addr);
            self.publish_ready();

            let router = healthz.merge(metrics);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                ("http", http::serve("http", listener, router, shutdown).await)
            });
            return Ok((bound, bound));
        }

        let healthz_listener = http::bind("healthz", healthz_addr).await?;
        let metrics_listener = http::bind("metrics", metrics_addr).await?;
        let bound = (
            healthz_listener.local_addr().unwrap_or(healthz_addr),
            metrics_listener.local_addr().unwrap_or(metrics_addr),
        );
        self.publish_ready();

        let token = shutdown.clone();
        tasks.spawn(async move {
            ("healthz", http::serve("healthz", healthz_listener, healthz, token).await)
        });
        let token = shutdown.clone();
        tasks.spawn(async move {
            ("metrics", http::serve("metrics", metrics_listener, metrics, token).await)
        });

        Ok(bound)
    }

    fn publish_ready(&mut self) {
        transition(&mut self.state, LifecycleState::Ready);
        self.readiness.mark_ready();
    }
}

/// Wait for the accept loop, then round-trip the known plaintext through it.
async fn verify_over_transport(socket_path: &Path, ready: oneshot::Receiver<()>) -> Result<()> {
    ready.await.map_err(|_| TransportError::NotAccepting)?;

    let mut client = transport::connect(socket_path).await?;
    transport::round_trip(&mut client).await
}

/// Tear down whatever startup already launched.
async fn abort_startup(
    shutdown: CancellationToken,
    mut tasks: JoinSet<TaskResult>,
    socket_path: &Path,
) {
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tasks.abort_all();
    }
    if let Err(e) = transport::clean_socket(socket_path) {
        warn!(error = %e, "failed to release socket after aborted startup");
    }
}

impl RunningService {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bound address of the liveness endpoint.
    pub fn healthz_addr(&self) -> SocketAddr {
        self.healthz_addr
    }

    /// Bound address of the metrics endpoint.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Resolve when a supervised server stops without being asked to.
    pub async fn failed(&mut self) -> Error {
        match self.tasks.join_next().await {
            Some(Ok((name, Ok(())))) => TransportError::Serve {
                name,
                reason: "stopped unexpectedly".to_string(),
            }
            .into(),
            Some(Ok((_, Err(e)))) => e.into(),
            Some(Err(e)) => TransportError::Serve {
                name: "task",
                reason: e.to_string(),
            }
            .into(),
            None => std::future::pending::<Error>().await,
        }
    }

    /// Stop accepting RPCs, stop the HTTP endpoints and release the socket.
    pub async fn shutdown(mut self) -> Result<()> {
        transition(&mut self.state, LifecycleState::ShuttingDown);
        self.shutdown.cancel();

        let mut first_error = None;
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok((name, Err(e))) => {
                        warn!(server = name, error = %e, "server stopped with error");
                        first_error.get_or_insert(e);
                    }
                    Err(e) => warn!(error = %e, "server task panicked"),
                    Ok(_) => {}
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("servers did not drain in time, aborting");
            self.tasks.abort_all();
        }

        transport::clean_socket(&self.socket_path)?;
        transition(&mut self.state, LifecycleState::Stopped);
        info!("kms plugin stopped");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
