//! Forward proxy: CONNECT interception and absolute-form requests.
//!
//! A CONNECT is answered `200 Connection Established`; the upgraded stream
//! is then terminated with a leaf for the client's SNI (or the CONNECT host)
//! and every decrypted request is proxied to `https://host:port` through the
//! same pipeline as reverse mode.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, Uri};
use hyper::body::Incoming;
use hyper::ext::ReasonPhrase;
use hyper::service::service_fn;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;

use super::cache::ProxyCache;
use crate::certs::LeafSigner;
use crate::error::GatewayError;
use crate::http::request::{ensure_request_id, ClientConn, Intercepted};
use crate::http::response;
use crate::net::tls::accept_with_leaf;

const DEFAULT_TLS_PORT: u16 = 443;

/// Split a CONNECT authority into host and port.
///
/// The port defaults to 443. IPv6 literals may be bracketed; a bare IPv6
/// literal is taken whole as the host.
pub fn parse_connect_target(authority: &str) -> Result<(String, u16), GatewayError> {
    let authority = authority.trim();
    let bad = || GatewayError::BadConnectTarget(authority.to_string());

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(bad)?)),
        }
    } else if authority.matches(':').count() > 1 {
        (authority, None)
    } else {
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(bad());
    }
    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| bad())?,
        None => DEFAULT_TLS_PORT,
    };
    Ok((host.to_string(), port))
}

/// Where a forward-mode request goes: the intercepted origin, the
/// absolute-form URI's origin, or plain HTTP to the `Host` header.
pub fn target_origin<B>(req: &Request<B>) -> Result<Uri, GatewayError> {
    let origin = if let Some(intercepted) = req.extensions().get::<Intercepted>() {
        format!("https://{}", intercepted.authority())
    } else if let (Some(scheme), Some(authority)) = (req.uri().scheme(), req.uri().authority()) {
        format!("{scheme}://{authority}")
    } else {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GatewayError::InvalidRequest("no target host".to_string()))?;
        format!("http://{host}")
    };

    origin.parse().map_err(|e: axum::http::uri::InvalidUri| GatewayError::InvalidUrl {
        url: origin.clone(),
        reason: e.to_string(),
    })
}

pub struct ForwardProxy {
    signer: Arc<LeafSigner>,
    proxies: ProxyCache,
}

impl ForwardProxy {
    pub fn new(signer: Arc<LeafSigner>, proxies: ProxyCache) -> Self {
        Self { signer, proxies }
    }

    pub fn signer(&self) -> &Arc<LeafSigner> {
        &self.signer
    }

    pub fn proxies(&self) -> &ProxyCache {
        &self.proxies
    }

    /// Proxy a non-CONNECT request.
    pub async fn serve(&self, req: Request<Body>) -> Response<Body> {
        match target_origin(&req) {
            Ok(origin) => self.proxies.get(&origin).serve(req).await,
            Err(e) => {
                tracing::warn!(uri = %req.uri(), error = %e, "No forward target");
                response::bad_request(&e)
            }
        }
    }

    /// Accept a CONNECT and intercept the tunnel in the background.
    pub fn connect(self: &Arc<Self>, mut req: Request<Body>) -> Response<Body> {
        let authority = req
            .uri()
            .authority()
            .map(|a| a.to_string())
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let (host, port) = match parse_connect_target(&authority) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected CONNECT");
                return response::bad_request(&e);
            }
        };

        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            tracing::error!(tunnel = %authority, "CONNECT without an upgradable connection");
            return response::internal_error();
        };

        let client = ClientConn::of(&req);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => this.intercept(upgraded, Intercepted { host, port }, client).await,
                Err(e) => tracing::warn!(tunnel = %authority, error = %e, "CONNECT upgrade failed"),
            }
        });

        let mut response = Response::new(Body::empty());
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(b"Connection Established"));
        response
    }

    async fn intercept(self: Arc<Self>, upgraded: Upgraded, target: Intercepted, client: ClientConn) {
        let tls = match accept_with_leaf(TokioIo::new(upgraded), &self.signer, &target.host).await {
            Ok(tls) => tls,
            Err(e) => {
                tracing::warn!(tunnel = %target.authority(), error = %e, "Tunnel handshake failed");
                return;
            }
        };
        tracing::debug!(tunnel = %target.authority(), "Tunnel intercepted");

        let authority = target.authority();
        let this = Arc::clone(&self);
        let service = service_fn(move |req: Request<Incoming>| {
            let this = Arc::clone(&this);
            let target = target.clone();
            async move {
                let mut req = req.map(Body::new);
                ensure_request_id(req.headers_mut());
                req.extensions_mut().insert(target);
                req.extensions_mut().insert(ClientConn { tls: true, ..client });
                Ok::<_, Infallible>(this.serve(req).await)
            }
        });

        if let Err(e) = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(tls), service)
            .with_upgrades()
            .await
        {
            tracing::debug!(tunnel = %authority, error = %e, "Tunnel connection ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_targets() {
        assert_eq!(parse_connect_target("dev1.com:443").unwrap(), ("dev1.com".into(), 443));
        assert_eq!(parse_connect_target("dev1.com").unwrap(), ("dev1.com".into(), 443));
        assert_eq!(parse_connect_target("10.0.0.1:8443").unwrap(), ("10.0.0.1".into(), 8443));
        assert_eq!(parse_connect_target("[::1]:8443").unwrap(), ("::1".into(), 8443));
        assert_eq!(parse_connect_target("[::1]").unwrap(), ("::1".into(), 443));
        assert_eq!(parse_connect_target("::1").unwrap(), ("::1".into(), 443));
    }

    #[test]
    fn bad_connect_targets() {
        for bad in ["", ":443", "dev1.com:http", "dev1.com:70000", "[::1", "[::1]x"] {
            assert!(
                matches!(parse_connect_target(bad), Err(GatewayError::BadConnectTarget(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn origin_selection() {
        let mut req = Request::builder()
            .uri("/index")
            .header("host", "dev2.com")
            .body(())
            .unwrap();
        assert_eq!(target_origin(&req).unwrap().to_string(), "http://dev2.com/");

        req.extensions_mut().insert(Intercepted { host: "dev1.com".into(), port: 443 });
        assert_eq!(target_origin(&req).unwrap().to_string(), "https://dev1.com:443/");

        let absolute = Request::builder()
            .uri("http://dev3.com:8080/a?b=1")
            .body(())
            .unwrap();
        assert_eq!(target_origin(&absolute).unwrap().to_string(), "http://dev3.com:8080/");

        let nothing = Request::builder().uri("/").body(()).unwrap();
        assert!(matches!(target_origin(&nothing), Err(GatewayError::InvalidRequest(_))));
    }
}
