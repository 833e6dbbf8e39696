//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_upstream_errors_total` (counter): failed round trips by category
//! - `gateway_capture_overflow_total` (counter): bodies replaced by the sentinel
//! - `gateway_leaf_cache_total` (counter): leaf lookups by hit/miss
//! - `gateway_records_published_total` (counter): audit records by sink, result
//! - `gateway_authz_decisions_total` (counter): authorizer outcomes
//! - `gateway_active_connections` (gauge): open client connections

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("gateway_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_capture_overflow() {
    metrics::counter!("gateway_capture_overflow_total").increment(1);
}

pub fn record_leaf_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("gateway_leaf_cache_total", "result" => result).increment(1);
}

pub fn record_published(sink: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!("gateway_records_published_total", "sink" => sink, "result" => result)
        .increment(1);
}

pub fn record_authz(variant: &'static str, allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    metrics::counter!("gateway_authz_decisions_total", "variant" => variant, "decision" => decision)
        .increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("gateway_active_connections").set(count as f64);
}
