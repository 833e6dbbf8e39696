//! The reverse proxy engine.
//!
//! # Request path
//! ```text
//! record request phase (+ bounded JSON/XML body capture)
//!     → hook (director | rewrite) + hop-by-hop strip + forwarded policy
//!     → authorizer (deny ends here)
//!     → round trip
//!     → 101: bridge the upgraded connections, publish early
//!     → otherwise: strip, modify_response, merge cookies, stream the body
//! ```
//!
//! The record is published exactly once: by the copy task after the body,
//! by the error path, on deny, early on upgrade, or by its drop guard when
//! the client goes away first.

use std::error::Error as StdError;
use std::sync::Arc;

use axum::body::Body;
use axum::http::response::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode, Version};
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpInfo;

use super::rewrite::{Hook, ProxyRequest};
use super::stream::{ChannelBody, CopyJob, FlushPolicy};
use super::transport::UpstreamClient;
use super::upgrade::spawn_bridge;
use crate::authz::{Authorizer, Verdict};
use crate::buffer::BufferPool;
use crate::error::GatewayError;
use crate::http::request::{cookie_value, ensure_request_id, set_cookie_name, ClientConn};
use crate::http::response;
use crate::observability::metrics;
use crate::record::capture::{read_request_body, request_capture_text, should_capture_request};
use crate::record::{PooledRecord, RecordPool};
use crate::security::headers;

/// Adjusts upstream response headers before they reach the client.
pub type ModifyResponseFn = dyn Fn(&mut Parts) -> Result<(), GatewayError> + Send + Sync;

/// Turns a proxying failure into the client response.
pub type ErrorHandlerFn = dyn Fn(&GatewayError) -> Response<Body> + Send + Sync;

/// Shared collaborators of a proxy instance.
#[derive(Clone)]
pub struct Pools {
    pub records: Arc<RecordPool>,
    pub buffers: Arc<BufferPool>,
}

pub struct ReverseProxy {
    hook: Hook,
    client: UpstreamClient,
    authorizer: Arc<dyn Authorizer>,
    pools: Pools,
    flush: FlushPolicy,
    modify_response: Option<Arc<ModifyResponseFn>>,
    error_handler: Arc<ErrorHandlerFn>,
}

impl ReverseProxy {
    pub fn new(
        hook: Hook,
        client: UpstreamClient,
        authorizer: Arc<dyn Authorizer>,
        pools: Pools,
    ) -> Self {
        Self {
            hook,
            client,
            authorizer,
            pools,
            flush: FlushPolicy::Buffered,
            modify_response: None,
            error_handler: Arc::new(|e: &GatewayError| response::bad_gateway(e)),
        }
    }

    pub fn with_flush(mut self, flush: FlushPolicy) -> Self {
        self.flush = flush;
        self
    }

    pub fn with_modify_response(mut self, f: Arc<ModifyResponseFn>) -> Self {
        self.modify_response = Some(f);
        self
    }

    pub fn with_error_handler(mut self, f: Arc<ErrorHandlerFn>) -> Self {
        self.error_handler = f;
        self
    }

    /// Proxy one request.
    pub async fn serve(&self, mut req: Request<Body>) -> Response<Body> {
        let client = ClientConn::of(&req);
        let trace_id = ensure_request_id(req.headers_mut());

        let mut record = self.pools.records.get();
        record.capture_request(&req, client.remote, client.scheme(), &trace_id);
        if let Some(id) = cookie_value(req.headers(), crate::authz::client_id::COOKIE_NAME) {
            record.client_id.push_str(id);
        }

        if should_capture_request(req.method(), req.headers()) {
            let (parts, body) = req.into_parts();
            match read_request_body(body).await {
                Ok((bytes, replay)) => {
                    record.req_body = request_capture_text(&bytes, self.pools.buffers.default_capacity());
                    req = Request::from_parts(parts, replay);
                }
                Err(e) => {
                    let error = GatewayError::InvalidRequest(format!("read request body: {e}"));
                    return self.fail_with(record, error, |e| response::bad_request(e));
                }
            }
        }

        let client_upgrade = req.extensions_mut().remove::<OnUpgrade>();
        let requested_upgrade = headers::upgrade_type(req.headers());
        let te_trailers = headers::accepts_trailers(req.headers());
        let inbound = match &self.hook {
            Hook::Rewrite(_) => Some((req.uri().clone(), req.headers().clone())),
            Hook::Director(_) => None,
        };

        let mut outreq = req;
        *outreq.version_mut() = Version::HTTP_11;

        if let Hook::Director(director) = &self.hook {
            if let Err(e) = director(&mut outreq) {
                return self.fail(record, e);
            }
        }

        let out_headers = outreq.headers_mut();
        headers::remove_hop_by_hop(out_headers);
        if te_trailers {
            out_headers.insert(header::TE, HeaderValue::from_static("trailers"));
        }
        if let Some(protocol) = &requested_upgrade {
            out_headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
            out_headers.insert(header::UPGRADE, protocol.clone());
        }

        match (&self.hook, &inbound) {
            (Hook::Rewrite(rewrite), Some((inbound_uri, inbound_headers))) => {
                headers::strip_forwarded(outreq.headers_mut());
                let mut pr = ProxyRequest {
                    inbound_uri,
                    inbound_headers,
                    client,
                    out: &mut outreq,
                };
                if let Err(e) = rewrite(&mut pr) {
                    return self.fail(record, e);
                }
            }
            _ => headers::append_forwarded_for(outreq.headers_mut(), client.remote.ip()),
        }

        let verdict = self.authorizer.authorize(&mut outreq, &mut record).await;
        metrics::record_authz(self.authorizer.name(), verdict.is_allow());
        let authz_headers = match verdict {
            Verdict::Allow { response_headers } => response_headers,
            Verdict::Deny(denied) => {
                tracing::info!(
                    trace_id = %trace_id,
                    authorizer = self.authorizer.name(),
                    status = denied.status().as_u16(),
                    "Request denied"
                );
                record.publish();
                return denied;
            }
        };

        record.capture_outbound(&outreq);
        tracing::debug!(trace_id = %trace_id, upstream = %outreq.uri(), "Forwarding request");

        let mut upstream = match self.client.request(outreq).await {
            Ok(upstream) => upstream,
            Err(e) => return self.fail(record, GatewayError::Transport(describe(&e))),
        };

        if let Some(info) = upstream.extensions().get::<HttpInfo>() {
            record.upstream_addr.clear();
            record.upstream_addr.push_str(&info.remote_addr().to_string());
        }
        record.capture_response(upstream.status(), upstream.headers());

        if upstream.status() == StatusCode::SWITCHING_PROTOCOLS {
            return self.switch_protocols(record, upstream, client_upgrade, requested_upgrade, trace_id);
        }

        let announced: Vec<HeaderValue> = upstream
            .headers()
            .get_all(header::TRAILER)
            .iter()
            .cloned()
            .collect();
        headers::remove_hop_by_hop(upstream.headers_mut());

        let (mut parts, body) = upstream.into_parts();
        if let Some(modify) = &self.modify_response {
            if let Err(e) = modify(&mut parts) {
                return self.fail(record, e);
            }
        }
        merge_response_headers(&mut parts.headers, authz_headers);
        for value in announced {
            parts.headers.append(header::TRAILER, value);
        }

        let (tx, client_body) = ChannelBody::channel();
        let job = CopyJob {
            upstream: body,
            tx,
            flush: self.flush.for_response(&parts.headers),
            pool: Arc::clone(&self.pools.buffers),
            record,
        };
        tokio::spawn(job.run());

        Response::from_parts(parts, Body::new(client_body))
    }

    fn switch_protocols(
        &self,
        mut record: PooledRecord,
        mut upstream: Response<hyper::body::Incoming>,
        client_upgrade: Option<OnUpgrade>,
        requested: Option<HeaderValue>,
        trace_id: String,
    ) -> Response<Body> {
        let offered = headers::upgrade_type(upstream.headers());
        let matches = match (&requested, &offered) {
            (Some(req), Some(got)) => req
                .to_str()
                .ok()
                .zip(got.to_str().ok())
                .is_some_and(|(a, b)| a.eq_ignore_ascii_case(b)),
            _ => false,
        };
        if !matches {
            let error = GatewayError::InvalidRequest(format!(
                "backend tried to switch protocol {offered:?} when {requested:?} was requested"
            ));
            return self.fail(record, error);
        }
        let Some(client_upgrade) = client_upgrade else {
            return self.fail(record, GatewayError::HijackUnsupported);
        };

        let upstream_upgrade = hyper::upgrade::on(&mut upstream);
        let (mut parts, _) = upstream.into_parts();
        if let Some(modify) = &self.modify_response {
            if let Err(e) = modify(&mut parts) {
                return self.fail(record, e);
            }
        }

        record.resp_body.clear();
        spawn_bridge(client_upgrade, upstream_upgrade, trace_id);
        record.publish_early();
        Response::from_parts(parts, Body::empty())
    }

    fn fail(&self, record: PooledRecord, error: GatewayError) -> Response<Body> {
        let handler = Arc::clone(&self.error_handler);
        self.fail_with(record, error, move |e| handler(e))
    }

    fn fail_with<F>(&self, mut record: PooledRecord, error: GatewayError, respond: F) -> Response<Body>
    where
        F: FnOnce(&GatewayError) -> Response<Body>,
    {
        let kind = error.kind();
        tracing::warn!(trace_id = %record.trace_id, kind = %kind, error = %error, "Proxy error");
        metrics::record_upstream_error(kind.as_str());

        record.resp_body.clear();
        record.resp_body.push_str(&error.to_string());
        let response = respond(&error);
        record.status_code = response.status().as_u16();
        record.publish();
        response
    }
}

/// Error text with its source chain, outermost first.
fn describe(error: &(dyn StdError + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Add authorizer headers; a cookie we set replaces the upstream cookie
/// of the same name so each name appears once.
fn merge_response_headers(target: &mut HeaderMap, ours: HeaderMap) {
    let our_cookies: Vec<HeaderValue> = ours.get_all(header::SET_COOKIE).iter().cloned().collect();
    if !our_cookies.is_empty() {
        let names: Vec<String> = our_cookies
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| set_cookie_name(v).to_string())
            .collect();
        let kept: Vec<HeaderValue> = target
            .get_all(header::SET_COOKIE)
            .iter()
            .filter(|v| {
                let name = v.to_str().map(set_cookie_name).unwrap_or_default();
                !names.iter().any(|n| n == name)
            })
            .cloned()
            .collect();
        target.remove(header::SET_COOKIE);
        for value in kept.into_iter().chain(our_cookies) {
            target.append(header::SET_COOKIE, value);
        }
    }

    let mut current = None;
    for (name, value) in ours {
        if let Some(name) = name {
            current = Some(name);
        }
        match &current {
            Some(name) if name != header::SET_COOKIE => {
                target.insert(name.clone(), value);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn our_cookie_replaces_upstream_cookie_of_same_name() {
        let mut target = HeaderMap::new();
        target.append(header::SET_COOKIE, HeaderValue::from_static("_zc=upstream; Path=/"));
        target.append(header::SET_COOKIE, HeaderValue::from_static("theme=dark"));

        let mut ours = HeaderMap::new();
        ours.append(header::SET_COOKIE, HeaderValue::from_static("_zc=ours; Path=/; HttpOnly"));

        merge_response_headers(&mut target, ours);
        let cookies: Vec<_> = target
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["theme=dark", "_zc=ours; Path=/; HttpOnly"]);
    }

    #[derive(Debug)]
    struct Outer(std::io::Error);

    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("client error (Connect)")
        }
    }

    impl StdError for Outer {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn error_chain_is_flattened() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert_eq!(
            describe(&Outer(refused)),
            "client error (Connect): connection refused"
        );
    }
}
