//! Per-request authorization stage.
//!
//! # Data Flow
//! ```text
//! outbound request (after rewrite + header policy)
//!     → Authorizer::authorize(outreq, record)
//!         Allow { response_headers } → round trip, headers merged into the client response
//!         Deny(response)             → response written as-is, upstream never contacted
//! ```
//!
//! Exactly one variant is configured per gateway:
//! - `record-only`: issues the `_zc` client id cookie, never denies
//! - `basic`: HTTP Basic credentials against a [`CredentialChecker`]
//! - `cookie`: a named session cookie against a [`CredentialChecker`]
//! - `remote`: delegates the decision to a policy endpoint

pub mod basic;
pub mod client_id;
pub mod cookie;
pub mod credential;
pub mod record_only;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};

use crate::buffer::pool::DEFAULT_CAPACITY;
use crate::config::{AuthzConfig, AuthzKind};
use crate::record::capture::RESPONSE_TOO_LARGE;
use crate::record::Record;

pub use basic::BasicAuthorizer;
pub use client_id::ClientIdIssuer;
pub use cookie::CookieAuthorizer;
pub use credential::{Credential, CredentialChecker, RemoteCredentials, StaticCredentials};
pub use record_only::RecordOnly;
pub use remote::RemoteAuthorizer;

/// Header set on the outbound request once a user is authenticated.
pub const FORWARDED_USER: HeaderName = HeaderName::from_static("x-forwarded-user");

#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    #[error("invalid authorization url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("authorization client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("credential service answered {0}")]
    Credential(u16),
}

/// Decision for one request.
#[derive(Debug)]
pub enum Verdict {
    /// Proceed. `response_headers` (cookies) are merged into the client response.
    Allow { response_headers: HeaderMap },
    /// Stop. The response is final and has already been recorded.
    Deny(Response<Body>),
}

impl Verdict {
    pub fn allow() -> Self {
        Verdict::Allow {
            response_headers: HeaderMap::new(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow { .. })
    }

    /// Build a deny response and record it as the outcome of the request.
    pub fn deny(record: &mut Record, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        record.capture_response(status, &headers);
        record.resp_size = body.len() as u64;
        record.resp_body.clear();
        if body.len() > DEFAULT_CAPACITY {
            record.resp_body.push_str(RESPONSE_TOO_LARGE);
        } else {
            record.resp_body.push_str(&String::from_utf8_lossy(&body));
        }

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Verdict::Deny(response)
    }

    /// Plain-text deny.
    pub fn deny_text(record: &mut Record, status: StatusCode, text: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::deny(record, status, headers, Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// A gate run on every outbound request before the round trip.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Variant name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Inspect and possibly enrich `outreq`. The request phase of `record`
    /// is already filled in.
    async fn authorize(&self, outreq: &mut Request<Body>, record: &mut Record) -> Verdict;
}

/// Build the configured variant.
pub fn build_authorizer(config: &AuthzConfig) -> Result<Arc<dyn Authorizer>, AuthzError> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let authorizer: Arc<dyn Authorizer> = match config.kind {
        AuthzKind::RecordOnly => Arc::new(RecordOnly::new(ClientIdIssuer::from_config(config))),
        AuthzKind::Basic => Arc::new(BasicAuthorizer::new(
            &config.realm,
            credential::build_checker(config, timeout)?,
        )),
        AuthzKind::Cookie => Arc::new(CookieAuthorizer::new(
            &config.cookie_name,
            credential::build_checker(config, timeout)?,
        )),
        AuthzKind::Remote => Arc::new(RemoteAuthorizer::from_config(config)?),
    };
    tracing::info!(variant = authorizer.name(), "Authorizer configured");
    Ok(authorizer)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, AuthzError> {
    Ok(reqwest::Client::builder().timeout(timeout).no_proxy().build()?)
}

pub(crate) fn parse_url(raw: &str) -> Result<url::Url, AuthzError> {
    url::Url::parse(raw).map_err(|e| AuthzError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_is_recorded() {
        let mut record = Record::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-reason", HeaderValue::from_static("x"));

        let verdict = Verdict::deny(&mut record, StatusCode::UNAUTHORIZED, headers, Bytes::from_static(b"nope"));
        let Verdict::Deny(response) = verdict else {
            panic!("expected deny");
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-reason"], "x");
        assert_eq!(record.status_code, 401);
        assert_eq!(record.resp_body, "nope");
        assert_eq!(record.resp_size, 4);
    }

    #[test]
    fn builds_every_variant() {
        let mut config = AuthzConfig::default();
        assert_eq!(build_authorizer(&config).unwrap().name(), "record-only");

        config.kind = AuthzKind::Basic;
        config.users.insert("alice".into(), "secret".into());
        assert_eq!(build_authorizer(&config).unwrap().name(), "basic");

        config.kind = AuthzKind::Cookie;
        assert_eq!(build_authorizer(&config).unwrap().name(), "cookie");

        config.kind = AuthzKind::Remote;
        config.url = "not a url".into();
        assert!(build_authorizer(&config).is_err());
        config.url = "http://127.0.0.1:9/check".into();
        assert_eq!(build_authorizer(&config).unwrap().name(), "remote");
    }
}
