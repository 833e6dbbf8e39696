//! HTTP server: accept loop, per-connection serving and graceful drain.
//!
//! # Responsibilities
//! - Terminate listener TLS (static or per-SNI leaf)
//! - Serve HTTP/1.1 and HTTP/2 with upgrades on every connection
//! - Send CONNECT straight to the gateway, everything else through the
//!   Axum router (request id, trace span)
//! - Swap the gateway on config reload without dropping connections
//! - Stop accepting on shutdown and drain within the grace period

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, Response},
    Router,
};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::{GatewayConfig, TlsMode};
use crate::gateway::{BuildError, Gateway};
use crate::http::request::ClientConn;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError, ListenerTls, TlsError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("listener tls: {0}")]
    Tls(#[from] TlsError),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ArcSwap<Gateway>>,
}

/// Replaces the live gateway when the configuration changes.
#[derive(Clone)]
pub struct Reloader {
    gateway: Arc<ArcSwap<Gateway>>,
}

impl Reloader {
    /// Build a gateway from `config` and swap it in. In-flight requests
    /// finish on the gateway they started with.
    pub fn apply(&self, config: &GatewayConfig) -> Result<(), BuildError> {
        let gateway = Gateway::from_config(config)?;
        self.gateway.store(Arc::new(gateway));
        tracing::info!(mode = ?config.gateway.mode, "Gateway reloaded");
        Ok(())
    }
}

pub struct HttpServer {
    gateway: Arc<ArcSwap<Gateway>>,
    tls: Option<ListenerTls>,
    tracker: ConnectionTracker,
    grace: Duration,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServerError> {
        let gateway = Gateway::from_config(config)?;
        let tls = match &config.listener.tls {
            None => None,
            Some(tls) if tls.mode == TlsMode::Static => Some(ListenerTls::from_files(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            Some(_) => Some(ListenerTls::Dynamic(Arc::clone(gateway.signer()))),
        };
        let grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
        Ok(Self::with_gateway(gateway, tls, grace))
    }

    pub fn with_gateway(gateway: Gateway, tls: Option<ListenerTls>, grace: Duration) -> Self {
        Self {
            gateway: Arc::new(ArcSwap::from_pointee(gateway)),
            tls,
            tracker: ConnectionTracker::new(),
            grace,
        }
    }

    pub fn reloader(&self) -> Reloader {
        Reloader {
            gateway: Arc::clone(&self.gateway),
        }
    }

    /// The live gateway.
    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.load_full()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %local_addr,
            tls = self.tls.is_some(),
            "HTTP server starting"
        );

        let router = Self::build_router(AppState {
            gateway: Arc::clone(&self.gateway),
        });
        let mut stop = shutdown.subscribe();

        loop {
            let (stream, remote, permit) = tokio::select! {
                _ = stop.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let local = stream.local_addr().unwrap_or(local_addr);
            let guard = self.tracker.track();
            let conn = Connection {
                router: router.clone(),
                gateway: Arc::clone(&self.gateway),
                shutdown: shutdown.subscribe(),
            };
            let tls = self.tls.clone();

            tokio::spawn(async move {
                tracing::trace!(connection_id = %guard.id(), peer_addr = %remote, "Serving connection");
                match tls {
                    None => {
                        conn.serve(stream, ClientConn { remote, local, tls: false })
                            .await
                    }
                    Some(tls) => match tls.accept(stream, local).await {
                        Ok(stream) => {
                            conn.serve(stream, ClientConn { remote, local, tls: true })
                                .await
                        }
                        Err(e) => {
                            tracing::debug!(peer_addr = %remote, error = %e, "TLS handshake failed")
                        }
                    },
                }
                drop(permit);
                drop(guard);
            });
        }

        tracing::info!(
            active = self.tracker.active_count(),
            grace_secs = self.grace.as_secs(),
            "Stopped accepting, draining connections"
        );
        if !self.tracker.drain(self.grace).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Grace period elapsed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

struct Connection {
    router: Router,
    gateway: Arc<ArcSwap<Gateway>>,
    shutdown: broadcast::Receiver<()>,
}

impl Connection {
    async fn serve<IO>(mut self, io: IO, client: ClientConn)
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let router = self.router;
        let gateway = self.gateway;
        let service = service_fn(move |req: Request<Incoming>| {
            let router = router.clone();
            let gateway = Arc::clone(&gateway);
            async move {
                let mut req = req.map(Body::new);
                req.extensions_mut().insert(client);
                if req.method() == Method::CONNECT {
                    return Ok::<_, Infallible>(gateway.load().connect(req));
                }
                router.oneshot(req).await
            }
        });

        let builder = auto::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = self.shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            tracing::debug!(peer_addr = %client.remote, error = %e, "Connection closed with error");
        }
    }
}

async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response<Body> {
    let gateway = state.gateway.load_full();
    gateway.handle(req).await
}

