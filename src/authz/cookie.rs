use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};

use super::{Authorizer, Credential, CredentialChecker, Verdict, FORWARDED_USER};
use crate::http::request::cookie_value;
use crate::record::Record;

/// Session cookie authentication.
pub struct CookieAuthorizer {
    cookie_name: String,
    checker: Arc<dyn CredentialChecker>,
}

impl CookieAuthorizer {
    pub fn new(cookie_name: &str, checker: Arc<dyn CredentialChecker>) -> Self {
        Self {
            cookie_name: cookie_name.to_string(),
            checker,
        }
    }
}

#[async_trait]
impl Authorizer for CookieAuthorizer {
    fn name(&self) -> &'static str {
        "cookie"
    }

    async fn authorize(&self, outreq: &mut Request<Body>, record: &mut Record) -> Verdict {
        let Some(token) = cookie_value(outreq.headers(), &self.cookie_name)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
        else {
            return Verdict::deny_text(record, StatusCode::UNAUTHORIZED, "401 Unauthorized");
        };

        match self.checker.check(Credential::Token { token: &token }).await {
            Ok(Some(account)) => {
                if !account.is_empty() {
                    if let Ok(value) = HeaderValue::from_str(&account) {
                        outreq.headers_mut().insert(FORWARDED_USER, value);
                    }
                    record.account.clear();
                    record.account.push_str(&account);
                }
                Verdict::allow()
            }
            Ok(None) => Verdict::deny_text(record, StatusCode::UNAUTHORIZED, "401 Unauthorized"),
            Err(e) => {
                tracing::error!(cookie = %self.cookie_name, error = %e, "Session check failed");
                Verdict::deny_text(record, StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
            }
        }
    }
}
