//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that each mode has the inputs it needs (upstream, CA, policy URL)
//! - Validate value ranges and URL schemes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::certs::profile::parse_expiry;
use crate::config::schema::{AuthzKind, GatewayConfig, ProxyMode, SinkKind, TlsMode};

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }

    if let Some(tls) = &config.listener.tls {
        match tls.mode {
            TlsMode::Static => {
                if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                    errors.push(ValidationError::new(
                        "listener.tls",
                        "static mode requires cert_path and key_path",
                    ));
                }
            }
            TlsMode::Dynamic => {
                if config.ca.is_none() {
                    errors.push(ValidationError::new("listener.tls", "dynamic mode requires [ca]"));
                }
            }
        }
    }

    match config.gateway.mode {
        ProxyMode::Reverse => match Url::parse(&config.gateway.upstream) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            Ok(_) => errors.push(ValidationError::new(
                "gateway.upstream",
                "must be an absolute http or https URL",
            )),
            Err(e) => errors.push(ValidationError::new("gateway.upstream", e.to_string())),
        },
        ProxyMode::Forward => {
            if config.ca.is_none() {
                errors.push(ValidationError::new("ca", "forward mode requires a CA"));
            }
        }
    }

    if let Some(ca) = &config.ca {
        if ca.cert_path.is_empty() || ca.key_path.is_empty() {
            errors.push(ValidationError::new("ca", "cert_path and key_path are required"));
        }
    }

    match config.record.sink {
        SinkKind::File if config.record.file_path.is_empty() => {
            errors.push(ValidationError::new("record.file_path", "required by the file sink"));
        }
        SinkKind::Syslog => match Url::parse(&config.record.syslog_url) {
            Ok(url) if matches!(url.scheme(), "udp" | "tcp") && url.port().is_some() => {}
            _ => errors.push(ValidationError::new(
                "record.syslog_url",
                "expected udp://host:port or tcp://host:port",
            )),
        },
        _ => {}
    }

    let authz = &config.authz;
    match authz.kind {
        AuthzKind::Remote => {
            if Url::parse(&authz.url).is_err() {
                errors.push(ValidationError::new("authz.url", "remote authorizer needs a valid URL"));
            }
        }
        AuthzKind::Basic => {
            if authz.credentials_url.is_empty() && authz.users.is_empty() {
                errors.push(ValidationError::new(
                    "authz",
                    "basic authorizer needs credentials_url or users",
                ));
            }
        }
        AuthzKind::Cookie => {
            if authz.credentials_url.is_empty() && authz.tokens.is_empty() {
                errors.push(ValidationError::new(
                    "authz",
                    "cookie authorizer needs credentials_url or tokens",
                ));
            }
            if authz.cookie_name.is_empty() {
                errors.push(ValidationError::new("authz.cookie_name", "must not be empty"));
            }
        }
        AuthzKind::RecordOnly => {}
    }
    if !authz.credentials_url.is_empty() && Url::parse(&authz.credentials_url).is_err() {
        errors.push(ValidationError::new("authz.credentials_url", "not a valid URL"));
    }
    if authz.timeout_ms == 0 {
        errors.push(ValidationError::new("authz.timeout_ms", "must be greater than 0"));
    }

    for (name, profile) in config.certs.profiles.iter() {
        if let Err(e) = parse_expiry(&profile.expiry) {
            errors.push(ValidationError::new(format!("certs.profiles.{name}.expiry"), e.to_string()));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CaConfig;

    fn reverse() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.gateway.upstream = "http://127.0.0.1:9000".into();
        config
    }

    #[test]
    fn reverse_with_upstream_is_valid() {
        assert!(validate_config(&reverse()).is_ok());
    }

    #[test]
    fn missing_upstream_is_reported() {
        let errors = validate_config(&GatewayConfig::default()).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "gateway.upstream"));
    }

    #[test]
    fn forward_requires_ca() {
        let mut config = GatewayConfig::default();
        config.gateway.mode = ProxyMode::Forward;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "ca"));

        config.ca = Some(CaConfig {
            cert_path: "ca.crt".into(),
            key_path: "ca.key".into(),
            ..CaConfig::default()
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = reverse();
        config.listener.max_connections = 0;
        config.record.sink = SinkKind::Syslog;
        config.record.syslog_url = "http://collector".into();
        config.authz.kind = AuthzKind::Remote;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn bad_profile_expiry_is_reported() {
        let mut config = reverse();
        config.certs.profiles.insert(
            "short",
            crate::certs::CertProfile {
                expiry: "3w".into(),
                ..Default::default()
            },
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "certs.profiles.short.expiry");
    }
}
