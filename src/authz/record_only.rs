use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request};

use super::client_id::{ClientIdIssuer, COOKIE_NAME};
use super::{Authorizer, Verdict};
use crate::http::request::cookie_value;
use crate::record::Record;

/// Never denies; only tags the client with a `_zc` id.
pub struct RecordOnly {
    issuer: ClientIdIssuer,
}

impl RecordOnly {
    pub fn new(issuer: ClientIdIssuer) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl Authorizer for RecordOnly {
    fn name(&self) -> &'static str {
        "record-only"
    }

    async fn authorize(&self, outreq: &mut Request<Body>, record: &mut Record) -> Verdict {
        let existing = cookie_value(outreq.headers(), COOKIE_NAME);
        let issued = self.issuer.issue(existing, &record.host);

        record.client_id.clear();
        record.client_id.push_str(&issued.value);

        let mut response_headers = HeaderMap::new();
        if let Some(cookie) = issued.set_cookie {
            response_headers.insert(header::SET_COOKIE, cookie);
        }
        Verdict::Allow { response_headers }
    }
}
