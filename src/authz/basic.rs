use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::{Authorizer, Credential, CredentialChecker, Verdict, FORWARDED_USER};
use crate::record::Record;

/// HTTP Basic authentication.
pub struct BasicAuthorizer {
    challenge: HeaderValue,
    checker: Arc<dyn CredentialChecker>,
}

impl BasicAuthorizer {
    pub fn new(realm: &str, checker: Arc<dyn CredentialChecker>) -> Self {
        let realm = realm.replace('"', "");
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        Self { challenge, checker }
    }

    fn unauthorized(&self, record: &mut Record) -> Verdict {
        let mut headers = HeaderMap::new();
        headers.insert(header::WWW_AUTHENTICATE, self.challenge.clone());
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Verdict::deny(record, StatusCode::UNAUTHORIZED, headers, "401 Unauthorized".into())
    }
}

/// `(user, password)` from `Authorization: Basic ...`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl Authorizer for BasicAuthorizer {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authorize(&self, outreq: &mut Request<Body>, record: &mut Record) -> Verdict {
        let Some((user, password)) = basic_credentials(outreq.headers()) else {
            return self.unauthorized(record);
        };

        match self
            .checker
            .check(Credential::Basic {
                user: &user,
                password: &password,
            })
            .await
        {
            Ok(Some(account)) => {
                if let Ok(value) = HeaderValue::from_str(&account) {
                    outreq.headers_mut().insert(FORWARDED_USER, value);
                }
                record.account.clear();
                record.account.push_str(&account);
                Verdict::allow()
            }
            Ok(None) => {
                tracing::debug!(user = %user, "Basic credentials rejected");
                self.unauthorized(record)
            }
            Err(e) => {
                tracing::error!(error = %e, "Credential check failed");
                Verdict::deny_text(record, StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
            }
        }
    }
}
