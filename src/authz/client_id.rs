//! Opaque `_zc` client id cookie.
//!
//! Value layout: `<prefix>.1.00.<16 hex>.<issued unix seconds>`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderValue;

use crate::config::AuthzConfig;

pub const COOKIE_NAME: &str = "_zc";

const VERSION: &str = "1";
const FLAGS: &str = "00";

/// Result of looking at the inbound cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    /// Cookie value in effect for this request.
    pub value: String,
    /// `Set-Cookie` to send back when the value was minted or renewed.
    pub set_cookie: Option<HeaderValue>,
}

/// Mints and renews client ids. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct ClientIdIssuer {
    prefix: String,
    lifetime: Duration,
    sites: Vec<String>,
}

impl ClientIdIssuer {
    pub fn new(prefix: impl Into<String>, lifetime: Duration, sites: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            lifetime,
            sites,
        }
    }

    pub fn from_config(config: &AuthzConfig) -> Self {
        Self::new(
            config.client_id_prefix.clone(),
            Duration::from_secs(config.client_id_lifetime_days * 24 * 60 * 60),
            config.sites.clone(),
        )
    }

    /// Keep, renew or mint the id for a request to `host`.
    pub fn issue(&self, existing: Option<&str>, host: &str) -> Issued {
        self.issue_at(existing, host, unix_now())
    }

    pub fn issue_at(&self, existing: Option<&str>, host: &str, now: u64) -> Issued {
        let value = match existing.and_then(parse) {
            Some((_, issued)) if !self.needs_renewal(issued, now) => {
                return Issued {
                    value: existing.unwrap_or_default().to_string(),
                    set_cookie: None,
                };
            }
            Some((id, _)) => self.format(id, now),
            None => self.format(&format!("{:016x}", fastrand::u64(..)), now),
        };

        let set_cookie = HeaderValue::from_str(&self.cookie(&value, host)).ok();
        Issued { value, set_cookie }
    }

    /// Renew strictly after 7/8 of the lifetime has elapsed.
    pub fn needs_renewal(&self, issued: u64, now: u64) -> bool {
        let threshold = u128::from(self.lifetime.as_secs()) * 7 / 8;
        u128::from(now.saturating_sub(issued)) > threshold
    }

    fn format(&self, id: &str, now: u64) -> String {
        format!("{}.{VERSION}.{FLAGS}.{id}.{now}", self.prefix)
    }

    fn cookie(&self, value: &str, host: &str) -> String {
        let mut cookie = format!(
            "{COOKIE_NAME}={value}; Path=/; Max-Age={}; HttpOnly",
            self.lifetime.as_secs()
        );
        if let Some(domain) = self.domain_for(host) {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        cookie
    }

    /// Longest configured site that `host` equals or is a subdomain of.
    pub fn domain_for(&self, host: &str) -> Option<&str> {
        let host = strip_port(host).to_ascii_lowercase();
        self.sites
            .iter()
            .map(|site| site.trim_start_matches('.'))
            .filter(|site| {
                let site = site.to_ascii_lowercase();
                host == site || host.ends_with(&format!(".{site}"))
            })
            .max_by_key(|site| site.len())
    }
}

/// `(id, issued_at)` from a well-formed value.
fn parse(value: &str) -> Option<(&str, u64)> {
    let mut parts = value.rsplitn(3, '.');
    let issued = parts.next()?.parse().ok()?;
    let id = parts.next()?;
    let head = parts.next()?;
    if id.len() != 16 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if !head.ends_with(&format!(".{VERSION}.{FLAGS}")) {
        return None;
    }
    Some((id, issued))
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(h, _)| h.trim_start_matches('['))
            .unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.bytes().all(|b| b.is_ascii_digit()) => h,
        _ => host,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 60 * 60;

    fn issuer(sites: &[&str]) -> ClientIdIssuer {
        ClientIdIssuer::new(
            "zc",
            Duration::from_secs(8 * DAY),
            sites.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn mints_when_absent() {
        let issued = issuer(&[]).issue_at(None, "app.local", 1_000);
        let (id, at) = parse(&issued.value).unwrap();
        assert_eq!(id.len(), 16);
        assert_eq!(at, 1_000);
        assert!(issued.value.starts_with("zc.1.00."));

        let cookie = issued.set_cookie.unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("_zc=zc.1.00."));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains(&format!("Max-Age={}", 8 * DAY)));
        assert!(cookie.contains("HttpOnly"));
        assert!(!cookie.contains("Domain"));
    }

    #[test]
    fn renews_only_past_seven_eighths() {
        let issuer = issuer(&[]);
        let existing = "zc.1.00.0123456789abcdef.0";

        let kept = issuer.issue_at(Some(existing), "h", 7 * DAY);
        assert_eq!(kept.value, existing);
        assert!(kept.set_cookie.is_none());

        let renewed = issuer.issue_at(Some(existing), "h", 7 * DAY + 1);
        assert_eq!(renewed.value, format!("zc.1.00.0123456789abcdef.{}", 7 * DAY + 1));
        assert!(renewed.set_cookie.is_some());
    }

    #[test]
    fn malformed_values_are_replaced() {
        let issuer = issuer(&[]);
        for bad in ["", "garbage", "zc.1.00.xyz.5", "zc.1.00.0123456789abcdef.notanumber"] {
            let issued = issuer.issue_at(Some(bad), "h", 10);
            assert_ne!(issued.value, bad);
            assert!(issued.set_cookie.is_some());
        }
    }

    #[test]
    fn longest_site_suffix_wins() {
        let issuer = issuer(&["example.com", ".shop.example.com", "other.org"]);
        assert_eq!(issuer.domain_for("a.shop.example.com:8443"), Some("shop.example.com"));
        assert_eq!(issuer.domain_for("www.example.com"), Some("example.com"));
        assert_eq!(issuer.domain_for("example.com"), Some("example.com"));
        assert_eq!(issuer.domain_for("badexample.com"), None);

        let issued = issuer.issue_at(None, "www.example.com", 1);
        let cookie = issued.set_cookie.unwrap();
        assert!(cookie.to_str().unwrap().ends_with("; Domain=example.com"));
    }
}
