//! Outbound URL rewriting and the request hooks built on it.
//!
//! Target path prefixes select how the inbound path is combined:
//! - `/~/X`: replace, the outbound path is `/X`
//! - `/-/P`: strip, the outbound path is the inbound path minus `P`
//! - anything else: join with exactly one `/` between the two

use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{header, HeaderMap, Request, Uri};

use crate::error::GatewayError;
use crate::http::request::ClientConn;
use crate::security::headers;

/// Combine a target path with the inbound path.
pub fn join_url_path(target: &str, inbound: &str) -> String {
    if let Some(rest) = target.strip_prefix("/~/") {
        return format!("/{rest}");
    }
    if let Some(prefix) = target.strip_prefix("/-") {
        let stripped = inbound.strip_prefix(prefix).unwrap_or(inbound);
        return if stripped.is_empty() {
            "/".to_string()
        } else if stripped.starts_with('/') {
            stripped.to_string()
        } else {
            format!("/{stripped}")
        };
    }
    single_joining_slash(target, inbound)
}

fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Target query first, then the inbound query.
pub fn merge_query(target: Option<&str>, inbound: Option<&str>) -> Option<String> {
    match (target.filter(|q| !q.is_empty()), inbound.filter(|q| !q.is_empty())) {
        (Some(t), Some(i)) => Some(format!("{t}&{i}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

/// Absolute outbound URI for `inbound` sent to `target`.
pub fn rewrite_uri(target: &Uri, inbound: &Uri) -> Result<Uri, GatewayError> {
    let path = join_url_path(target.path(), inbound.path());
    let path_and_query = match merge_query(target.query(), inbound.query()) {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let invalid = |reason: String| GatewayError::InvalidUrl {
        url: target.to_string(),
        reason,
    };

    let mut builder = Uri::builder().path_and_query(
        path_and_query
            .parse::<PathAndQuery>()
            .map_err(|e| invalid(e.to_string()))?,
    );
    if let Some(scheme) = target.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = target.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

/// What a rewrite hook sees: the untouched inbound facts and the
/// outbound request it may change.
pub struct ProxyRequest<'a> {
    pub inbound_uri: &'a Uri,
    pub inbound_headers: &'a HeaderMap,
    pub client: ClientConn,
    pub out: &'a mut Request<Body>,
}

impl ProxyRequest<'_> {
    /// Route to `target`; the outbound `Host` follows the target.
    pub fn set_url(&mut self, target: &Uri) -> Result<(), GatewayError> {
        *self.out.uri_mut() = rewrite_uri(target, self.inbound_uri)?;
        self.out.headers_mut().remove(header::HOST);
        Ok(())
    }

    /// `X-Forwarded-{For,Host,Proto}` from the inbound request.
    pub fn set_x_forwarded(&mut self) {
        let prior = headers::forwarded_for(self.inbound_headers);
        let host = self
            .inbound_headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.inbound_uri.authority().map(|a| a.as_str()))
            .unwrap_or_default();
        headers::set_x_forwarded(
            self.out.headers_mut(),
            prior.as_deref(),
            self.client.remote.ip(),
            host,
            self.client.tls,
        );
    }
}

pub type DirectorFn = dyn Fn(&mut Request<Body>) -> Result<(), GatewayError> + Send + Sync;
pub type RewriteFn = dyn Fn(&mut ProxyRequest<'_>) -> Result<(), GatewayError> + Send + Sync;

/// Exactly one outbound hook per proxy.
#[derive(Clone)]
pub enum Hook {
    /// Edits the outbound request in place; `X-Forwarded-For` is appended
    /// afterwards.
    Director(Arc<DirectorFn>),
    /// Sees inbound and outbound side by side; client forwarding headers
    /// are removed beforehand and the hook owns `X-Forwarded-*`.
    Rewrite(Arc<RewriteFn>),
}

impl Hook {
    /// Director for a single origin.
    pub fn director(target: Uri) -> Self {
        Hook::Director(Arc::new(move |out: &mut Request<Body>| {
            let uri = rewrite_uri(&target, out.uri())?;
            *out.uri_mut() = uri;
            Ok(())
        }))
    }

    /// Rewrite hook for a single origin that also sets `X-Forwarded-*`.
    pub fn rewrite(target: Uri) -> Self {
        Hook::custom_rewrite(move |pr| {
            pr.set_url(&target)?;
            pr.set_x_forwarded();
            Ok(())
        })
    }

    /// Wrap a closure as a rewrite hook.
    pub fn custom_rewrite<F>(f: F) -> Self
    where
        F: Fn(&mut ProxyRequest<'_>) -> Result<(), GatewayError> + Send + Sync + 'static,
    {
        Hook::Rewrite(Arc::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Hook::Director(_) => "director",
            Hook::Rewrite(_) => "rewrite",
        }
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
