//! Delegates the decision to a policy endpoint.
//!
//! The policy service sees where the request is going through
//! `X-Request-Origin-*` headers plus the caller's cookies and credentials.
//! A 2xx answer carrying `X-Request-Sky-Authorize` admits the request; its
//! `X-*` headers are copied onto the outbound request and its cookies are
//! passed to the client. Any other answer is relayed to the client as-is.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};

use super::{http_client, parse_url, AuthzError, Authorizer, Verdict};
use crate::config::AuthzConfig;
use crate::http::request::REQUEST_ID;
use crate::record::derive::{self, SKY_AUTHORIZE};
use crate::record::Record;
use crate::security::headers::remove_hop_by_hop;

const ORIGIN_HOST: &str = "x-request-origin-host";
const ORIGIN_PATH: &str = "x-request-origin-path";
const ORIGIN_METHOD: &str = "x-request-origin-method";
const ORIGIN_ACTION: &str = "x-request-origin-action";
const FORCE_USER: &str = "x-debug-force-user";

pub struct RemoteAuthorizer {
    client: reqwest::Client,
    url: url::Url,
    skip_if_authorized: bool,
    force_user: Option<HeaderValue>,
}

impl RemoteAuthorizer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AuthzError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: parse_url(url)?,
            skip_if_authorized: false,
            force_user: None,
        })
    }

    pub fn from_config(config: &AuthzConfig) -> Result<Self, AuthzError> {
        let mut authorizer = Self::new(&config.url, Duration::from_millis(config.timeout_ms))?;
        authorizer.skip_if_authorized = config.skip_if_authorized;
        if !config.force_user.is_empty() {
            authorizer.force_user = HeaderValue::from_str(&config.force_user).ok();
        }
        Ok(authorizer)
    }

    fn policy_request(&self, outreq: &Request<Body>, record: &Record) -> reqwest::RequestBuilder {
        let path = record
            .url
            .parse::<axum::http::Uri>()
            .map(|uri| uri.path().to_string())
            .unwrap_or_default();

        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };
        put(ORIGIN_HOST, &record.host);
        put(ORIGIN_PATH, &path);
        put(ORIGIN_METHOD, &record.method);
        put(ORIGIN_ACTION, &derive::action(&record.url));

        for name in [header::COOKIE, header::AUTHORIZATION] {
            for value in outreq.headers().get_all(&name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if let Some(id) = outreq.headers().get(REQUEST_ID) {
            headers.insert(HeaderName::from_static(REQUEST_ID), id.clone());
        }
        if let Some(user) = &self.force_user {
            headers.insert(HeaderName::from_static(FORCE_USER), user.clone());
        }

        self.client.get(self.url.clone()).headers(headers)
    }
}

fn non_empty(headers: &HeaderMap, name: &str) -> bool {
    headers.get(name).is_some_and(|v| !v.is_empty())
}

#[async_trait]
impl Authorizer for RemoteAuthorizer {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn authorize(&self, outreq: &mut Request<Body>, record: &mut Record) -> Verdict {
        if self.skip_if_authorized && non_empty(outreq.headers(), SKY_AUTHORIZE) {
            return Verdict::allow();
        }

        let response = match self.policy_request(outreq, record).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, timeout = e.is_timeout(), "Policy call failed");
                return Verdict::deny_text(
                    record,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "500 Internal Server Error",
                );
            }
        };

        if let Some(addr) = response.remote_addr() {
            record.authz_addr.clear();
            record.authz_addr.push_str(&addr.to_string());
        }

        let status = response.status();
        let mut headers = response.headers().clone();

        if status.is_success() && non_empty(&headers, SKY_AUTHORIZE) {
            let mut response_headers = HeaderMap::new();
            for value in headers.get_all(header::SET_COOKIE) {
                response_headers.append(header::SET_COOKIE, value.clone());
            }

            let mirrored: Vec<HeaderName> = headers
                .keys()
                .filter(|name| name.as_str().starts_with("x-"))
                .cloned()
                .collect();
            for name in mirrored {
                outreq.headers_mut().remove(&name);
                for value in headers.get_all(&name) {
                    outreq.headers_mut().append(name.clone(), value.clone());
                }
            }
            return Verdict::Allow { response_headers };
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read policy response body");
                Bytes::new()
            }
        };
        tracing::debug!(status = status.as_u16(), "Policy denied request");

        headers.remove(SKY_AUTHORIZE);
        headers.remove(header::CONTENT_LENGTH);
        remove_hop_by_hop(&mut headers);
        Verdict::deny(record, status, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/authz")
    }

    #[tokio::test]
    async fn already_authorized_requests_skip_the_call() {
        let mut authorizer = RemoteAuthorizer::new(&closed_port_url(), Duration::from_secs(1)).unwrap();
        authorizer.skip_if_authorized = true;

        let mut req = Request::builder()
            .header(SKY_AUTHORIZE, "e30=")
            .body(Body::empty())
            .unwrap();
        let mut record = Record::default();
        assert!(authorizer.authorize(&mut req, &mut record).await.is_allow());
    }

    #[tokio::test]
    async fn unreachable_policy_is_500() {
        let authorizer = RemoteAuthorizer::new(&closed_port_url(), Duration::from_secs(1)).unwrap();
        let mut req = Request::new(Body::empty());
        let mut record = Record::default();

        let Verdict::Deny(response) = authorizer.authorize(&mut req, &mut record).await else {
            panic!("expected deny");
        };
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(record.status_code, 500);
    }

    #[test]
    fn origin_headers_and_forced_user() {
        let mut config = AuthzConfig {
            url: "http://127.0.0.1:9/authz".into(),
            force_user: "961212".into(),
            ..AuthzConfig::default()
        };
        config.kind = crate::config::AuthzKind::Remote;
        let authorizer = RemoteAuthorizer::from_config(&config).unwrap();

        let outreq = Request::builder()
            .header(header::COOKIE, "kst=abc")
            .header(REQUEST_ID, "rid-1")
            .body(Body::empty())
            .unwrap();
        let mut record = Record::default();
        record.host.push_str("gw.local");
        record.method.push_str("POST");
        record.url.push_str("/api/ping?action=ping.do");

        let built = authorizer.policy_request(&outreq, &record).build().unwrap();
        let headers = built.headers();
        assert_eq!(headers[ORIGIN_HOST], "gw.local");
        assert_eq!(headers[ORIGIN_PATH], "/api/ping");
        assert_eq!(headers[ORIGIN_METHOD], "POST");
        assert_eq!(headers[ORIGIN_ACTION], "ping.do");
        assert_eq!(headers[header::COOKIE], "kst=abc");
        assert_eq!(headers[REQUEST_ID], "rid-1");
        assert_eq!(headers[FORCE_USER], "961212");
    }
}
