//! The audit record.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::{header, HeaderMap, Request, StatusCode};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::derive;

/// Outcome classification written as `result2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Abnormal,
    Redirect,
}

/// One request/response cycle, filled in phases and published once.
#[derive(Debug, Default, Serialize)]
pub struct Record {
    // request phase
    pub trace_id: String,
    pub remote_ip: String,
    pub user_agent: String,
    pub referer: String,
    pub client_id: String,
    pub scheme: String,
    pub method: String,
    pub host: String,
    pub url: String,
    #[serde(serialize_with = "serialize_headers")]
    pub req_header: HeaderMap,
    pub req_body: String,
    pub remote_addr: String,
    pub start_time: DateTime<Utc>,

    // outbound phase
    pub out_host: String,
    pub out_url: String,
    #[serde(serialize_with = "serialize_headers")]
    pub out_header: HeaderMap,
    pub upstream_addr: String,
    pub authz_addr: String,

    // response phase
    #[serde(serialize_with = "serialize_headers")]
    pub resp_header: HeaderMap,
    pub status_code: u16,
    pub resp_size: u64,
    pub resp_body: String,
    /// Milliseconds from arrival to upstream response headers.
    pub upstream_time: f64,

    // derived
    /// Milliseconds from arrival to the end of the response body.
    pub serve_time: f64,
    pub result2: Outcome,
    pub action: String,
    pub flow_id: String,
    pub token_id: String,
    pub nickname: String,
    pub account: String,
    pub user: String,
    pub tenant: String,
    pub user_tenant: String,
    pub app: String,
    pub app_tenant: String,
    pub role: String,

    /// Published before the body finished (protocol upgrade).
    pub early: bool,

    #[serde(skip)]
    arrived: Option<Instant>,
}

impl Record {
    /// Request phase. Body capture happens separately.
    pub fn capture_request<B>(
        &mut self,
        req: &Request<B>,
        remote: SocketAddr,
        scheme: &str,
        trace_id: &str,
    ) {
        self.arrived = Some(Instant::now());
        self.start_time = Utc::now();

        let headers = req.headers();
        self.trace_id.push_str(trace_id);
        self.remote_ip.push_str(&remote.ip().to_string());
        self.remote_addr.push_str(&remote.to_string());
        self.user_agent.push_str(header_str(headers, header::USER_AGENT));
        self.referer.push_str(header_str(headers, header::REFERER));
        self.scheme.push_str(scheme);
        self.method.push_str(req.method().as_str());
        self.host.push_str(request_host(req));
        self.url.push_str(&req.uri().to_string());
        clone_headers(headers, &mut self.req_header);
    }

    /// Outbound phase, taken after the authorizer ran.
    pub fn capture_outbound<B>(&mut self, outreq: &Request<B>) {
        let uri = outreq.uri();
        self.out_host.clear();
        self.out_host
            .push_str(uri.authority().map(|a| a.as_str()).unwrap_or_default());
        self.out_url.clear();
        self.out_url.push_str(&uri.to_string());
        clone_headers(outreq.headers(), &mut self.out_header);
    }

    /// Response phase: status and headers as received.
    pub fn capture_response(&mut self, status: StatusCode, headers: &HeaderMap) {
        self.status_code = status.as_u16();
        clone_headers(headers, &mut self.resp_header);
        self.upstream_time = self.elapsed_ms();
    }

    /// Stamp `serve_time`; called once the response is done.
    pub fn mark_served(&mut self) {
        self.serve_time = self.elapsed_ms().max(self.upstream_time);
    }

    fn elapsed_ms(&self) -> f64 {
        self.arrived
            .map(|t| t.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or_default()
    }

    /// Fill the derived fields from what was captured.
    pub fn derive(&mut self) {
        self.action = derive::action(&self.url);
        self.flow_id = derive::query_value(&self.out_url, "flow").unwrap_or_default();

        let source = if self.out_header.is_empty() {
            &self.req_header
        } else {
            &self.out_header
        };
        // Token claims win; fields already set by the authorizer survive
        // when the token says nothing.
        let identity = derive::identity(source);
        for (field, derived) in [
            (&mut self.token_id, identity.token_id),
            (&mut self.nickname, identity.nickname),
            (&mut self.account, identity.account),
            (&mut self.user, identity.user),
            (&mut self.tenant, identity.tenant),
            (&mut self.user_tenant, identity.user_tenant),
            (&mut self.app, identity.app),
            (&mut self.app_tenant, identity.app_tenant),
            (&mut self.role, identity.role),
        ] {
            if !derived.is_empty() {
                *field = derived;
            }
        }

        self.result2 = derive::outcome(self.status_code, &self.resp_body);
    }

    /// Zero every field in place; maps keep their allocations.
    pub fn cleanup(&mut self) {
        for s in [
            &mut self.trace_id,
            &mut self.remote_ip,
            &mut self.user_agent,
            &mut self.referer,
            &mut self.client_id,
            &mut self.scheme,
            &mut self.method,
            &mut self.host,
            &mut self.url,
            &mut self.req_body,
            &mut self.remote_addr,
            &mut self.out_host,
            &mut self.out_url,
            &mut self.upstream_addr,
            &mut self.authz_addr,
            &mut self.resp_body,
            &mut self.action,
            &mut self.flow_id,
            &mut self.token_id,
            &mut self.nickname,
            &mut self.account,
            &mut self.user,
            &mut self.tenant,
            &mut self.user_tenant,
            &mut self.app,
            &mut self.app_tenant,
            &mut self.role,
        ] {
            s.clear();
        }
        self.req_header.clear();
        self.out_header.clear();
        self.resp_header.clear();
        self.start_time = DateTime::<Utc>::default();
        self.status_code = 0;
        self.resp_size = 0;
        self.upstream_time = 0.0;
        self.serve_time = 0.0;
        self.result2 = Outcome::Success;
        self.early = false;
        self.arrived = None;
    }

    /// One-line JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn request_host<B>(req: &Request<B>) -> &str {
    req.uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| req.headers().get(header::HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or_default()
}

fn clone_headers(from: &HeaderMap, into: &mut HeaderMap) {
    into.clear();
    for (name, value) in from {
        into.append(name.clone(), value.clone());
    }
}

/// `{"name": ["v1", "v2"]}`, non-UTF-8 values lossily decoded.
fn serialize_headers<S: Serializer>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(headers.keys_len()))?;
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        map.serialize_entry(name.as_str(), &values)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request() -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/ping?action=ping.do")
            .header("host", "gw.local")
            .header("user-agent", "curl/8")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn request_phase_fields() {
        let mut record = Record::default();
        let remote: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        record.capture_request(&request(), remote, "http", "trace-1");

        assert_eq!(record.trace_id, "trace-1");
        assert_eq!(record.remote_ip, "10.0.0.7");
        assert_eq!(record.remote_addr, "10.0.0.7:5555");
        assert_eq!(record.user_agent, "curl/8");
        assert_eq!(record.host, "gw.local");
        assert_eq!(record.method, "POST");
        assert_eq!(record.req_header.get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn timings_are_ordered() {
        let mut record = Record::default();
        record.capture_request(&request(), "127.0.0.1:1".parse().unwrap(), "http", "t");
        record.capture_response(StatusCode::OK, &HeaderMap::new());
        record.mark_served();
        assert!(record.upstream_time >= 0.0);
        assert!(record.serve_time >= record.upstream_time);
    }

    #[test]
    fn headers_serialize_as_lists() {
        let mut record = Record::default();
        record.capture_request(&request(), "127.0.0.1:1".parse().unwrap(), "http", "t");
        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["req_header"]["x-multi"], serde_json::json!(["a", "b"]));
        assert_eq!(json["result2"], "success");
    }

    #[test]
    fn cleanup_zeroes_in_place() {
        let mut record = Record::default();
        record.capture_request(&request(), "127.0.0.1:1".parse().unwrap(), "http", "t");
        record.status_code = 500;
        record.resp_body.push_str("boom");
        let capacity = record.req_header.capacity();

        record.cleanup();
        assert!(record.trace_id.is_empty());
        assert!(record.req_header.is_empty());
        assert_eq!(record.req_header.capacity(), capacity);
        assert_eq!(record.status_code, 0);
        assert!(record.resp_body.is_empty());
    }
}
