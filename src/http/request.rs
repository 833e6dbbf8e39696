//! Request-side helpers shared by the pipeline stages.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderValue, Request};

/// Header carrying the per-request correlation id.
pub const REQUEST_ID: &str = "x-request-id";

/// Connection facts attached to every request as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConn {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    /// The client reached us over TLS (listener TLS or a CONNECT tunnel).
    pub tls: bool,
}

impl ClientConn {
    /// The extension set by the server, or unspecified addresses when the
    /// request did not come through a listener.
    pub fn of<B>(req: &Request<B>) -> Self {
        req.extensions().get::<ClientConn>().copied().unwrap_or(ClientConn {
            remote: SocketAddr::from(([0, 0, 0, 0], 0)),
            local: SocketAddr::from(([0, 0, 0, 0], 0)),
            tls: false,
        })
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }
}

/// Origin of a request decrypted from a CONNECT tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intercepted {
    pub host: String,
    pub port: u16,
}

impl Intercepted {
    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(REQUEST_ID).and_then(|v| v.to_str().ok())
}

/// The request id, minting a UUID v4 when the client sent none.
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(id) = request_id(headers).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(REQUEST_ID, value);
    }
    id
}

/// All `name=value` pairs from every `Cookie` header.
pub fn cookies<'a>(headers: &'a HeaderMap) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim(), value.trim().trim_matches('"')))
        })
}

/// First value of cookie `name`.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    cookies(headers).find(|(n, _)| *n == name).map(|(_, v)| v)
}

/// Name of the cookie set by a `Set-Cookie` value.
pub fn set_cookie_name(value: &str) -> &str {
    value
        .split(';')
        .next()
        .and_then(|pair| pair.split_once('='))
        .map(|(name, _)| name.trim())
        .unwrap_or_default()
}
