//! Upstream HTTP client.
//!
//! Idle keep-alive pool, HTTP/1.1 and HTTP/2 over rustls with the native
//! root store. The TCP dial is bounded by `dial_ms`; dial plus TLS handshake
//! together by `dial_ms + tls_handshake_ms`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::Uri;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tower::Service;

use crate::config::schema::TimeoutConfig;
use crate::error::GatewayError;

pub type UpstreamClient = Client<TimedConnector<HttpsConnector<HttpConnector>>, Body>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Applies a single deadline to an inner connector.
///
/// The TCP dial has its own limit on the `HttpConnector` (`dial_ms`); this
/// wrapper bounds dial plus TLS handshake together at `dial_ms +
/// tls_handshake_ms`, since hyper-rustls exposes no separate handshake
/// timeout.
#[derive(Clone)]
pub struct TimedConnector<C> {
    inner: C,
    timeout: Duration,
}

impl<C> TimedConnector<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<C> Service<Uri> for TimedConnector<C>
where
    C: Service<Uri> + Send,
    C::Response: Send + 'static,
    C::Error: Into<BoxError>,
    C::Future: Send + 'static,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let timeout = self.timeout;
        let connecting = self.inner.call(dst.clone());
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(format!("dial {dst}: connect timed out after {timeout:?}").into()),
            }
        })
    }
}

/// Accepts any upstream certificate. Testing only.
#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        tracing::warn!(error = %error, "Skipping unreadable native root certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    tracing::debug!(added, ignored, "Loaded native root certificates");
    roots
}

/// rustls client configuration for upstream connections.
pub fn client_tls_config(insecure_skip_verify: bool) -> Result<ClientConfig, GatewayError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Transport(format!("tls setup: {e}")))?;

    let config = if insecure_skip_verify {
        tracing::warn!("Upstream certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            .with_no_client_auth()
    } else {
        builder.with_root_certificates(native_roots()).with_no_client_auth()
    };
    Ok(config)
}

/// Pooled upstream client.
pub fn build_client(
    insecure_skip_verify: bool,
    timeouts: &TimeoutConfig,
) -> Result<UpstreamClient, GatewayError> {
    let dial = Duration::from_millis(timeouts.dial_ms);
    let handshake = Duration::from_millis(timeouts.tls_handshake_ms);

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(dial));
    http.set_keepalive(Some(Duration::from_secs(timeouts.idle_keepalive_secs)));
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(client_tls_config(insecure_skip_verify)?)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(timeouts.idle_keepalive_secs))
        .build(TimedConnector::new(https, dial + handshake));
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_http_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await;
        });

        let client = build_client(false, &TimeoutConfig::default()).unwrap();
        let req = axum::http::Request::get(format!("http://{addr}/"))
            .body(Body::empty())
            .unwrap();
        let resp = client.request(req).await.unwrap();
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = build_client(true, &TimeoutConfig::default()).unwrap();
        let req = axum::http::Request::get(format!("http://{addr}/"))
            .body(Body::empty())
            .unwrap();
        assert!(client.request(req).await.is_err());
    }

    #[tokio::test]
    async fn stalled_tls_handshake_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept, then never answer the ClientHello.
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
            }
        });

        let timeouts = TimeoutConfig {
            dial_ms: 100,
            tls_handshake_ms: 100,
            ..TimeoutConfig::default()
        };
        let client = build_client(true, &timeouts).unwrap();
        let req = axum::http::Request::get(format!("https://{addr}/"))
            .body(Body::empty())
            .unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), client.request(req))
            .await
            .expect("connect deadline should fire first");
        assert!(outcome.is_err());
    }
}
