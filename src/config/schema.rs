//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::certs::CertProfiles;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Proxy mode, upstream and streaming behavior.
    pub gateway: ProxySettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Buffer pool sizing.
    pub buffers: BufferConfig,

    /// Audit record pool and sink.
    pub record: RecordConfig,

    /// Authorization stage.
    pub authz: AuthzConfig,

    /// CA used to sign intercepted leaves.
    pub ca: Option<CaConfig>,

    /// Certificate profiles.
    pub certs: CertsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// How the listener obtains its certificate.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Fixed certificate from PEM files.
    #[default]
    Static,
    /// Per-SNI leaf from the CA signer.
    Dynamic,
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub mode: TlsMode,

    /// Path to certificate file (PEM). Static mode only.
    pub cert_path: String,

    /// Path to private key file (PEM). Static mode only.
    pub key_path: String,
}

/// Deployment shape.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Fronts a single known upstream.
    #[default]
    Reverse,
    /// Intercepts CONNECT and proxies absolute-form requests.
    Forward,
}

/// Which outbound request hook the reverse proxy runs.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// Rewrites the URL and appends `X-Forwarded-For`.
    #[default]
    Director,
    /// Strips client forwarding headers and sets `X-Forwarded-*` itself.
    Rewrite,
}

/// Proxy behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    pub mode: ProxyMode,

    /// Upstream origin, reverse mode only (e.g. "http://10.0.0.5:8080/-/api").
    pub upstream: String,

    pub hook: HookKind,

    /// 0 = flush when the copy buffer fills, >0 = max latency in ms,
    /// <0 = flush after every write.
    pub flush_interval_ms: i64,

    /// Skip upstream certificate verification (testing only).
    pub insecure_skip_verify: bool,

    /// Application name used for the syslog tag.
    pub app_name: String,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Reverse,
            upstream: String::new(),
            hook: HookKind::Director,
            flush_interval_ms: 0,
            insecure_skip_verify: false,
            app_name: "audit-gateway".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream TCP dial timeout in milliseconds.
    pub dial_ms: u64,

    /// Upstream TLS handshake timeout in milliseconds.
    pub tls_handshake_ms: u64,

    /// Idle pooled connection lifetime in seconds.
    pub idle_keepalive_secs: u64,

    /// Drain deadline on shutdown in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: 30_000,
            tls_handshake_ms: 10_000,
            idle_keepalive_secs: 90,
            shutdown_grace_secs: 30,
        }
    }
}

/// Buffer pool sizing. Zero selects the built-in default.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BufferConfig {
    pub default_capacity: usize,
    pub max_capacity: usize,
}

/// Destination for audit records.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Stdout,
    File,
    Syslog,
    None,
}

/// Audit record settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecordConfig {
    /// Idle records kept in the pool.
    pub pool_size: usize,

    pub sink: SinkKind,

    /// Append target for the file sink.
    pub file_path: String,

    /// `udp://host:port` or `tcp://host:port`.
    pub syslog_url: String,

    /// Kubernetes namespace appended to the syslog tag. Empty reads the
    /// service account namespace file when present.
    pub namespace: String,

    /// Also print each record to stdout (syslog sink).
    pub mirror_stdout: bool,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            sink: SinkKind::Stdout,
            file_path: String::new(),
            syslog_url: String::new(),
            namespace: String::new(),
            mirror_stdout: false,
        }
    }
}

/// Authorizer variant.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthzKind {
    #[default]
    RecordOnly,
    Basic,
    Cookie,
    Remote,
}

/// Authorization settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthzConfig {
    pub kind: AuthzKind,

    /// Realm announced in `WWW-Authenticate` (basic).
    pub realm: String,

    /// Session cookie checked by the cookie variant.
    pub cookie_name: String,

    /// Remote credential check endpoint (basic, cookie). Empty uses the
    /// static tables below.
    pub credentials_url: String,

    /// Static user → password table (basic).
    pub users: HashMap<String, String>,

    /// Static token → account table (cookie).
    pub tokens: HashMap<String, String>,

    /// Policy endpoint (remote).
    pub url: String,

    /// Policy and credential call deadline in milliseconds.
    pub timeout_ms: u64,

    /// Allow requests already carrying `X-Request-Sky-Authorize` (remote).
    pub skip_if_authorized: bool,

    /// Value sent as `X-Debug-Force-User`; empty sends nothing.
    pub force_user: String,

    /// Client id cookie prefix (record-only).
    pub client_id_prefix: String,

    /// Client id lifetime in days (record-only).
    pub client_id_lifetime_days: u64,

    /// Cookie domains; the longest suffix of the request host wins.
    pub sites: Vec<String>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            kind: AuthzKind::RecordOnly,
            realm: "gateway".to_string(),
            cookie_name: "session".to_string(),
            credentials_url: String::new(),
            users: HashMap::new(),
            tokens: HashMap::new(),
            url: String::new(),
            timeout_ms: 3_000,
            skip_if_authorized: false,
            force_user: String::new(),
            client_id_prefix: "zc".to_string(),
            client_id_lifetime_days: 730,
            sites: Vec::new(),
        }
    }
}

/// CA material for the leaf signer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CaConfig {
    pub cert_path: String,
    pub key_path: String,

    /// The CA is an intermediate; append it to every leaf chain.
    pub intermediate: bool,

    /// Profile used for leaves.
    pub leaf_profile: String,
}

/// Certificate profiles keyed by name.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CertsConfig {
    pub profiles: CertProfiles,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [gateway]
            upstream = "http://127.0.0.1:9000"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.mode, ProxyMode::Reverse);
        assert_eq!(config.authz.kind, AuthzKind::RecordOnly);
        assert_eq!(config.authz.timeout_ms, 3_000);
        assert_eq!(config.record.sink, SinkKind::Stdout);
        assert!(config.certs.profiles.get("default").is_ok());
    }

    #[test]
    fn full_file_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:8443"
            [listener.tls]
            mode = "dynamic"

            [gateway]
            mode = "forward"
            hook = "rewrite"
            flush_interval_ms = -1

            [record]
            sink = "syslog"
            syslog_url = "udp://127.0.0.1:514"

            [authz]
            kind = "remote"
            url = "http://policy.local/check"
            skip_if_authorized = true

            [ca]
            cert_path = "/etc/gw/ca.crt"
            key_path = "/etc/gw/ca.key"

            [certs.profiles.default]
            expiry = "30d"
            key_size = 2048
            [certs.profiles.default.subject]
            country = "CN"
            organization = "Gateway"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.tls.unwrap().mode, TlsMode::Dynamic);
        assert_eq!(config.gateway.mode, ProxyMode::Forward);
        assert_eq!(config.gateway.hook, HookKind::Rewrite);
        assert_eq!(config.gateway.flush_interval_ms, -1);
        assert_eq!(config.record.sink, SinkKind::Syslog);
        assert_eq!(config.authz.kind, AuthzKind::Remote);
        assert!(config.ca.is_some());
        let profile = config.certs.profiles.get("default").unwrap();
        assert_eq!(profile.expiry, "30d");
        assert_eq!(profile.subject.country, "CN");
    }
}
