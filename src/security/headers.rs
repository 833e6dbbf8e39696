//! Hop-by-hop stripping and forwarded-header policy.
//!
//! # Responsibilities
//! - Remove connection-scoped headers in both directions
//! - Preserve the `Upgrade` intent and `Te: trailers` across the strip
//! - Maintain `X-Forwarded-*` for the director and rewrite hooks

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Fixed hop-by-hop set; anything starting with `proxy-` is also dropped.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including those named in `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    let proxy: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("proxy-"))
        .cloned()
        .collect();
    for name in proxy {
        headers.remove(name);
    }
}

/// `Connection` lists `token` (case-insensitive).
pub fn connection_has(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// The requested protocol when the message asks for an upgrade.
pub fn upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
    if !connection_has(headers, "upgrade") {
        return None;
    }
    headers.get(header::UPGRADE).cloned()
}

/// The client announced it accepts trailers.
pub fn accepts_trailers(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("trailers"))
}

/// Comma-joined `X-Forwarded-For` chain, if any.
pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Director policy: append the client IP, keeping earlier hops.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let chain = match forwarded_for(headers) {
        Some(prior) => format!("{prior}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Rewrite policy: drop every client-supplied forwarding header.
pub fn strip_forwarded(headers: &mut HeaderMap) {
    headers.remove(header::FORWARDED);
    headers.remove(X_FORWARDED_FOR);
    headers.remove(X_FORWARDED_HOST);
    headers.remove(X_FORWARDED_PROTO);
}

/// Set `X-Forwarded-{For,Host,Proto}` from the inbound request.
pub fn set_x_forwarded(
    headers: &mut HeaderMap,
    prior_chain: Option<&str>,
    client_ip: IpAddr,
    inbound_host: &str,
    tls: bool,
) {
    let chain = match prior_chain {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    match HeaderValue::from_str(inbound_host) {
        Ok(value) if !inbound_host.is_empty() => {
            headers.insert(X_FORWARDED_HOST, value);
        }
        _ => {
            headers.remove(X_FORWARDED_HOST);
        }
    }
    let proto = if tls { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(*k, HeaderValue::from_static(v));
        }
        headers
    }

    #[test]
    fn strips_fixed_listed_and_proxy_headers() {
        let mut headers = map(&[
            ("connection", "keep-alive, x-session-hop"),
            ("keep-alive", "timeout=5"),
            ("proxy-authorization", "Basic abc"),
            ("proxy-connection", "keep-alive"),
            ("te", "trailers"),
            ("trailer", "x-checksum"),
            ("transfer-encoding", "chunked"),
            ("upgrade", "websocket"),
            ("x-session-hop", "1"),
            ("content-type", "application/json"),
        ]);
        remove_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn upgrade_requires_connection_token() {
        let with = map(&[("connection", "Upgrade"), ("upgrade", "websocket")]);
        assert_eq!(upgrade_type(&with).unwrap(), "websocket");

        let without = map(&[("upgrade", "websocket")]);
        assert!(upgrade_type(&without).is_none());
    }

    #[test]
    fn trailers_token_detection() {
        assert!(accepts_trailers(&map(&[("te", "gzip, trailers")])));
        assert!(!accepts_trailers(&map(&[("te", "gzip")])));
    }

    #[test]
    fn forwarded_for_appends() {
        let mut headers = map(&[("x-forwarded-for", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]);
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        assert_eq!(headers["x-forwarded-for"], "1.1.1.1, 2.2.2.2, 10.0.0.1");

        let mut fresh = HeaderMap::new();
        append_forwarded_for(&mut fresh, "10.0.0.1".parse().unwrap());
        assert_eq!(fresh["x-forwarded-for"], "10.0.0.1");
    }

    #[test]
    fn rewrite_policy_strips_then_sets() {
        let mut headers = map(&[
            ("forwarded", "for=evil"),
            ("x-forwarded-for", "6.6.6.6"),
            ("x-forwarded-host", "evil"),
            ("x-forwarded-proto", "gopher"),
        ]);
        strip_forwarded(&mut headers);
        assert!(headers.is_empty());

        set_x_forwarded(&mut headers, Some("1.1.1.1"), "10.0.0.1".parse().unwrap(), "gw.local", true);
        assert_eq!(headers["x-forwarded-for"], "1.1.1.1, 10.0.0.1");
        assert_eq!(headers["x-forwarded-host"], "gw.local");
        assert_eq!(headers["x-forwarded-proto"], "https");
    }
}
