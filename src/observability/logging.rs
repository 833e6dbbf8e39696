//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level so operators can raise
//! verbosity without touching the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

const DEFAULT_DIRECTIVES: &str = "audit_gateway=info,tower_http=info";

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(&config.log_level)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// A bare level applies to this crate and tower-http; anything else is a
/// full directive string.
fn directives(level: &str) -> String {
    let level = level.trim();
    if level.is_empty() {
        return DEFAULT_DIRECTIVES.to_string();
    }
    if level.contains('=') || level.contains(',') {
        return level.to_string();
    }
    format!("audit_gateway={level},tower_http={level}")
}
