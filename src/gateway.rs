//! The assembled gateway: one proxy mode plus the collaborators it shares.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response, Uri};

use crate::authz::{build_authorizer, Authorizer, AuthzError};
use crate::buffer::BufferPool;
use crate::certs::{CaBundle, CertError, LeafSigner};
use crate::config::{GatewayConfig, HookKind, ProxyMode};
use crate::error::GatewayError;
use crate::http::response;
use crate::observability::metrics;
use crate::proxy::{
    build_client, FlushPolicy, ForwardProxy, Hook, Pools, ProxyCache, ReverseProxy,
};
use crate::record::{build_sink, RecordPool, Sink, SinkError};

/// Profile used for leaves when `[ca]` names none.
const DEFAULT_LEAF_PROFILE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("upstream {url:?}: {reason}")]
    Upstream { url: String, reason: String },

    #[error("certificate authority: {0}")]
    Certificate(#[from] CertError),

    #[error("record sink: {0}")]
    Sink(#[from] SinkError),

    #[error("authorizer: {0}")]
    Authz(#[from] AuthzError),

    #[error("upstream client: {0}")]
    Client(#[from] GatewayError),
}

enum Mode {
    Reverse(ReverseProxy),
    Forward(Arc<ForwardProxy>),
}

pub struct Gateway {
    mode: Mode,
    signer: Arc<LeafSigner>,
    records: Arc<RecordPool>,
}

impl Gateway {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, BuildError> {
        GatewayBuilder::new(config.clone()).build()
    }

    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn mode(&self) -> ProxyMode {
        match self.mode {
            Mode::Reverse(_) => ProxyMode::Reverse,
            Mode::Forward(_) => ProxyMode::Forward,
        }
    }

    /// Leaf signer shared by forward interception and dynamic listener TLS.
    pub fn signer(&self) -> &Arc<LeafSigner> {
        &self.signer
    }

    pub fn records(&self) -> &Arc<RecordPool> {
        &self.records
    }

    /// Proxy any non-CONNECT request.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().clone();

        let response = match &self.mode {
            Mode::Reverse(proxy) => proxy.serve(req).await,
            Mode::Forward(proxy) => proxy.serve(req).await,
        };

        metrics::record_request(method.as_str(), response.status().as_u16(), start);
        response
    }

    /// CONNECT is only meaningful to a forward proxy.
    pub fn connect(&self, req: Request<Body>) -> Response<Body> {
        match &self.mode {
            Mode::Reverse(_) => {
                tracing::debug!(uri = %req.uri(), "CONNECT refused in reverse mode");
                response::method_not_allowed()
            }
            Mode::Forward(proxy) => proxy.connect(req),
        }
    }
}

/// Assembles a [`Gateway`], optionally with an injected sink or authorizer.
pub struct GatewayBuilder {
    config: GatewayConfig,
    sink: Option<Arc<dyn Sink>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            sink: None,
            authorizer: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self) -> Result<Gateway, BuildError> {
        let config = &self.config;

        let sink = match self.sink {
            Some(sink) => sink,
            None => build_sink(&config.record, &config.gateway.app_name)?,
        };
        let records = RecordPool::new(config.record.pool_size, sink);
        let pools = Pools {
            records: Arc::clone(&records),
            buffers: Arc::new(BufferPool::new(
                config.buffers.default_capacity,
                config.buffers.max_capacity,
            )),
        };

        let authorizer = match self.authorizer {
            Some(authorizer) => authorizer,
            None => build_authorizer(&config.authz)?,
        };
        let client = build_client(config.gateway.insecure_skip_verify, &config.timeouts)?;
        let flush = FlushPolicy::from_millis(config.gateway.flush_interval_ms);
        let signer = Arc::new(build_signer(config)?);

        let mode = match config.gateway.mode {
            ProxyMode::Reverse => {
                let upstream = parse_upstream(&config.gateway.upstream)?;
                tracing::info!(upstream = %upstream, hook = ?config.gateway.hook, "Reverse mode");
                let hook = match config.gateway.hook {
                    HookKind::Director => Hook::director(upstream),
                    HookKind::Rewrite => Hook::rewrite(upstream),
                };
                Mode::Reverse(ReverseProxy::new(hook, client, authorizer, pools).with_flush(flush))
            }
            ProxyMode::Forward => {
                tracing::info!(hook = ?config.gateway.hook, "Forward mode");
                let proxies = ProxyCache::new(config.gateway.hook, client, authorizer, pools, flush);
                Mode::Forward(Arc::new(ForwardProxy::new(Arc::clone(&signer), proxies)))
            }
        };

        Ok(Gateway {
            mode,
            signer,
            records,
        })
    }
}

fn parse_upstream(raw: &str) -> Result<Uri, BuildError> {
    let invalid = |reason: &str| BuildError::Upstream {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let uri: Uri = raw.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(invalid("expected scheme://host[:port][/path]"));
    }
    Ok(uri)
}

fn build_signer(config: &GatewayConfig) -> Result<LeafSigner, BuildError> {
    let profiles = config.certs.profiles.clone();
    let Some(ca) = &config.ca else {
        return Ok(LeafSigner::new(profiles, DEFAULT_LEAF_PROFILE, None));
    };

    let bundle = CaBundle::load(Path::new(&ca.cert_path), Path::new(&ca.key_path))?;
    let profile = if ca.leaf_profile.is_empty() {
        DEFAULT_LEAF_PROFILE
    } else {
        ca.leaf_profile.as_str()
    };
    tracing::info!(cert = %ca.cert_path, profile, intermediate = ca.intermediate, "CA loaded");
    Ok(LeafSigner::new(profiles, profile, Some(bundle)).with_chain(ca.intermediate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sink::MemorySink;

    fn reverse(upstream: &str) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.gateway.upstream = upstream.to_string();
        config
    }

    #[test]
    fn upstream_must_be_absolute() {
        let sink = Arc::new(MemorySink::new());
        let err = Gateway::builder(reverse("/relative"))
            .sink(sink)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Upstream { .. }));
    }

    #[tokio::test]
    async fn connect_refused_in_reverse_mode() {
        let gateway = Gateway::builder(reverse("http://127.0.0.1:9"))
            .sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();
        assert_eq!(gateway.mode(), ProxyMode::Reverse);

        let req = Request::builder()
            .method("CONNECT")
            .uri("dev1.com:443")
            .body(Body::empty())
            .unwrap();
        assert_eq!(gateway.connect(req).status(), 405);
    }

    #[tokio::test]
    async fn forward_mode_signs_self_signed_without_ca() {
        let mut config = GatewayConfig::default();
        config.gateway.mode = ProxyMode::Forward;
        let gateway = Gateway::builder(config)
            .sink(Arc::new(MemorySink::new()))
            .build()
            .unwrap();

        assert_eq!(gateway.mode(), ProxyMode::Forward);
        assert!(gateway.signer().ca().is_none());
        let req = Request::builder()
            .method("CONNECT")
            .uri("/")
            .header("host", "dev1.com:bad")
            .body(Body::empty())
            .unwrap();
        assert_eq!(gateway.connect(req).status(), 400);
    }
}
