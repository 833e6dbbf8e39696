//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) flows through spans and into audit records
//! - Metric updates are plain atomic increments behind the `metrics` facade
//! - Audit records are not logs; they go through `record::sink`

pub mod logging;
pub mod metrics;
