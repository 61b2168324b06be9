use std::{net::SocketAddr, sync::Arc};

use axum::{response::IntoResponse, routing::get, Extension, Json, Router};
use futures::Stream;
use tokio::sync::{oneshot, watch};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    bridge::{BridgeState, ReadLoop},
    config::Config,
    error::Error,
    registry::ClientRegistry,
    serial::{error::ReadError, RawLine, SerialSource},
    stats::{BridgeStats, StatsSnapshot},
    websocket,
};

/// State every connection handler and route can reach.
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) registry: ClientRegistry,
    pub(crate) stats: Arc<BridgeStats>,
    pub(crate) state: watch::Receiver<BridgeState>,
}

impl Shared {
    async fn stats(&self) -> StatsSnapshot {
        let clients = self.registry.len().await;
        let state = *self.state.borrow();

        self.stats.snapshot(clients, state)
    }
}

/// The bridge between one line source and any number of websocket clients.
#[derive(Debug)]
pub struct Bridge {
    shared: Shared,
    state: watch::Sender<BridgeState>,
}

impl Bridge {
    /// Set up a bridge. Nothing is opened or bound yet.
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;

        let (state, state_rx) = watch::channel(BridgeState::Starting);

        Ok(Self {
            shared: Shared {
                config,
                registry: ClientRegistry::new(),
                stats: Arc::new(BridgeStats::default()),
                state: state_rx,
            },
            state,
        })
    }

    /// The connected clients.
    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    /// The configuration in use.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Watch what the bridge is doing.
    pub fn state(&self) -> watch::Receiver<BridgeState> {
        self.shared.state.clone()
    }

    /// Current statistics.
    pub async fn stats(&self) -> StatsSnapshot {
        self.shared.stats().await
    }

    /// Ask a serving bridge to stop.
    pub fn shutdown(&self) {
        info!("Shutting down");
        self.state.send_replace(BridgeState::ShuttingDown);
    }

    /// Open the configured serial device and serve its lines.
    ///
    /// Fails right away if the device can not be opened.
    pub async fn serve_device(&self) -> Result<(), Error> {
        let config = &self.shared.config;

        let source = SerialSource::open(config.tty_connector(), config.read_options())?;
        let span = info_span!("serial", path = %config.serial.path);

        self.serve(source.into_stream(), None)
            .instrument(span)
            .await
    }

    /// Serve the given lines.
    ///
    /// Returns when [`Bridge::shutdown`] is called, or with an error if the
    /// listener can not be set up.
    /// The port allocated will be sent on the provided channel, if any.
    pub async fn serve<S>(
        &self,
        lines: S,
        allocated_port: Option<oneshot::Sender<u16>>,
    ) -> Result<(), Error>
    where
        S: Stream<Item = Result<RawLine, ReadError>> + Send + 'static,
    {
        let shared = self.shared.clone();

        let app = Router::new()
            .route("/", get(websocket::ws_handler))
            .route("/config", get(show_config))
            .route("/version", get(show_version))
            .route("/stats", get(show_stats))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    // Each websocket needs to be able to reach the registry
                    .layer(Extension(shared.clone())),
            );

        let listener = bind(&shared.config).await?;
        let server = axum::Server::from_tcp(listener)
            .map_err(|e| Error::Server {
                addr: SocketAddr::from(([0, 0, 0, 0], shared.config.listen.port)),
                source: Box::new(e),
            })?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let addr = server.local_addr();

        let read_loop = ReadLoop {
            parser: shared.config.line_parser(),
            registry: shared.registry.clone(),
            stats: shared.stats.clone(),
            timing: shared.config.timing.clone(),
        };
        let read_handle = tokio::spawn(read_loop.run(lines).in_current_span());

        self.state.send_replace(BridgeState::Running);
        info!("listening on {}", addr);

        if let Some(port_reply) = allocated_port {
            if port_reply.send(addr.port()).is_err() {
                debug!("Nobody wanted to know the allocated port");
            }
        }

        let mut state = self.state();
        let result = server
            .with_graceful_shutdown(async move {
                while *state.borrow() != BridgeState::ShuttingDown {
                    if state.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;

        read_handle.abort();

        result.map_err(|e| {
            error!(?e, "Server stopped");
            Error::Server {
                addr,
                source: Box::new(e),
            }
        })
    }
}

// Binds the first resolved address only.
async fn bind(config: &Config) -> Result<std::net::TcpListener, Error> {
    let host = config.listen.host.as_str();
    let port = config.listen.port;
    let bind_error = |source: std::io::Error| Error::Bind {
        addr: format!("{host}:{port}"),
        source,
    };

    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host did not resolve to any address",
            ))
        })?;

    std::net::TcpListener::bind(addr).map_err(bind_error)
}

/// Start a bridge for the given lines on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port<S>(
    mut config: Config,
    lines: S,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error>
where
    S: Stream<Item = Result<RawLine, ReadError>> + Send + 'static,
{
    config.listen.port = 0;

    Bridge::new(config)?.serve(lines, Some(allocated_port)).await
}

async fn show_config(Extension(shared): Extension<Shared>) -> impl IntoResponse {
    shared.config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}

async fn show_stats(Extension(shared): Extension<Shared>) -> impl IntoResponse {
    Json(shared.stats().await)
}
