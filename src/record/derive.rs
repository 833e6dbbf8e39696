//! Fields derived from captured request and response data.
//!
//! Nothing in here panics on odd input: malformed tokens, headers or bodies
//! simply leave the derived fields empty.

use axum::http::{header, HeaderMap, Uri};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

use super::model::Outcome;
use crate::http::request::cookie_value;

pub const SKY_AUTHORIZE: &str = "x-request-sky-authorize";

const BEARER_PREFIX: &str = "Bearer kst.";
const COOKIE_PREFIX: &str = "kst.";
const TOKEN_ID_LEN: usize = 24;

/// Identity fields pulled from tokens and the authorize header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Identity {
    pub token_id: String,
    pub nickname: String,
    pub account: String,
    pub user: String,
    pub tenant: String,
    pub user_tenant: String,
    pub app: String,
    pub app_tenant: String,
    pub role: String,
}

/// `action` query parameter, else the path without its leading slash.
pub fn action(url: &str) -> String {
    if let Some(action) = query_value(url, "action") {
        return action;
    }
    url.parse::<Uri>()
        .map(|uri| uri.path().trim_start_matches('/').to_string())
        .unwrap_or_default()
}

/// First value of `key` in the query string of `url`.
pub fn query_value(url: &str, key: &str) -> Option<String> {
    let uri = url.parse::<Uri>().ok()?;
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Identity from `Authorization`, the `kst` cookie and the authorize header.
pub fn identity(headers: &HeaderMap) -> Identity {
    let mut identity = Identity::default();

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with(BEARER_PREFIX));
    if let Some(token) = bearer {
        identity.token_id = token_slice(token, BEARER_PREFIX.len());
    } else if let Some(token) = cookie_value(headers, "kst").filter(|v| v.starts_with(COOKIE_PREFIX)) {
        identity.token_id = token_slice(token, COOKIE_PREFIX.len());
    }

    if let Some(claims) = headers
        .get(SKY_AUTHORIZE)
        .and_then(|v| v.to_str().ok())
        .and_then(SkyClaims::decode)
    {
        claims.apply(&mut identity);
    }
    identity
}

/// 24 characters after the prefix; empty when the token is too short.
fn token_slice(token: &str, start: usize) -> String {
    token
        .get(start..start + TOKEN_ID_LEN)
        .unwrap_or_default()
        .to_string()
}

/// Claims carried in `X-Request-Sky-Authorize` (base64 JSON object).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SkyClaims {
    pub jti: Option<String>,
    pub nnm: Option<String>,
    pub sub: Option<String>,
    pub uco: Option<String>,
    pub tco: Option<String>,
    pub tuc: Option<String>,
    pub three: Option<String>,
    pub app: Option<String>,
    pub trc: Option<String>,
    pub rol: Option<String>,
}

impl SkyClaims {
    /// Decode standard or URL-safe base64, then a JSON object. Any other
    /// shape yields `None`; non-string claim values are stringified.
    pub fn decode(encoded: &str) -> Option<Self> {
        let encoded = encoded.trim();
        let raw = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
            .ok()?;
        let Value::Object(map) = serde_json::from_slice::<Value>(&raw).ok()? else {
            return None;
        };

        let claim = |key: &str| -> Option<String> {
            match map.get(key)? {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        };

        Some(Self {
            jti: claim("jti"),
            nnm: claim("nnm"),
            sub: claim("sub"),
            uco: claim("uco"),
            tco: claim("tco"),
            tuc: claim("tuc"),
            three: claim("three"),
            app: claim("app"),
            trc: claim("trc"),
            rol: claim("rol"),
        })
    }

    fn apply(self, identity: &mut Identity) {
        let set = |field: &mut String, value: Option<String>| {
            if let Some(value) = value {
                *field = value;
            }
        };
        set(&mut identity.token_id, self.jti);
        set(&mut identity.nickname, self.nnm);
        set(&mut identity.account, self.sub);
        set(&mut identity.user, self.uco);
        set(&mut identity.tenant, self.tco);
        set(&mut identity.user_tenant, self.tuc);
        set(&mut identity.app, self.three);
        set(&mut identity.app_tenant, self.app);
        set(&mut identity.role, self.trc.or(self.rol));
    }
}

/// Status-based outcome, refined by a JSON `{"success": false}` body.
pub fn outcome(status: u16, body: &str) -> Outcome {
    if status >= 400 {
        return Outcome::Abnormal;
    }
    if (300..400).contains(&status) {
        return Outcome::Redirect;
    }

    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return Outcome::Success;
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) else {
        return Outcome::Success;
    };
    match map.get("success") {
        Some(Value::Bool(false)) => {
            let show_type = map.get("showType").and_then(Value::as_i64);
            if show_type == Some(9) {
                Outcome::Redirect
            } else {
                Outcome::Abnormal
            }
        }
        _ => Outcome::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn action_prefers_query() {
        assert_eq!(action("/api/ping?action=user.login"), "user.login");
        assert_eq!(action("/api/ping"), "api/ping");
        assert_eq!(action("https://gw.local/v1/items?x=1"), "v1/items");
        assert_eq!(action(""), "");
    }

    #[test]
    fn flow_from_query() {
        assert_eq!(query_value("http://u/x?flow=abc&y=1", "flow").as_deref(), Some("abc"));
        assert_eq!(query_value("http://u/x", "flow"), None);
    }

    #[test]
    fn bearer_token_id() {
        let mut headers = HeaderMap::new();
        let token = format!("Bearer kst.{}{}", "A".repeat(24), "tail");
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
        assert_eq!(identity(&headers).token_id, "A".repeat(24));
    }

    #[test]
    fn cookie_token_id() {
        let mut headers = HeaderMap::new();
        let cookie = format!("a=1; kst=kst.{}rest", "B".repeat(24));
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert_eq!(identity(&headers).token_id, "B".repeat(24));
    }

    #[test]
    fn short_token_yields_empty_id() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer kst.short"));
        assert_eq!(identity(&headers).token_id, "");
    }

    #[test]
    fn authorize_header_claims() {
        let claims = serde_json::json!({
            "jti": "tok-1", "nnm": "Ann", "sub": "acct", "uco": "u1",
            "tco": "t1", "tuc": "ut1", "three": "app1", "app": "at1", "rol": "admin"
        });
        let encoded = STANDARD.encode(claims.to_string());
        let mut headers = HeaderMap::new();
        headers.insert(SKY_AUTHORIZE, HeaderValue::from_str(&encoded).unwrap());

        let id = identity(&headers);
        assert_eq!(id.token_id, "tok-1");
        assert_eq!(id.nickname, "Ann");
        assert_eq!(id.account, "acct");
        assert_eq!(id.user, "u1");
        assert_eq!(id.tenant, "t1");
        assert_eq!(id.user_tenant, "ut1");
        assert_eq!(id.app, "app1");
        assert_eq!(id.app_tenant, "at1");
        assert_eq!(id.role, "admin");
    }

    #[test]
    fn trc_wins_over_rol() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"trc":"owner","rol":"admin","sub":7}"#);
        let claims = SkyClaims::decode(&encoded).unwrap();
        let mut id = Identity::default();
        claims.apply(&mut id);
        assert_eq!(id.role, "owner");
        assert_eq!(id.account, "7");
    }

    #[test]
    fn malformed_claims_are_ignored() {
        for bad in ["%%%", "", &STANDARD.encode("[1,2]"), &STANDARD.encode("not json")] {
            assert!(SkyClaims::decode(bad).is_none(), "{bad:?}");
        }
    }

    #[test]
    fn outcome_rules() {
        assert_eq!(outcome(500, ""), Outcome::Abnormal);
        assert_eq!(outcome(404, r#"{"success":true}"#), Outcome::Abnormal);
        assert_eq!(outcome(302, ""), Outcome::Redirect);
        assert_eq!(outcome(200, r#"{"success":true}"#), Outcome::Success);
        assert_eq!(outcome(200, r#"{"success":false,"showType":9}"#), Outcome::Redirect);
        assert_eq!(outcome(200, r#"{"success":false,"showType":2}"#), Outcome::Abnormal);
        assert_eq!(outcome(200, "response body too large"), Outcome::Success);
        assert_eq!(outcome(200, "{broken"), Outcome::Success);
    }
}
