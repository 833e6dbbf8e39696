//! Audit gateway library: a reverse or intercepting forward HTTP proxy that
//! authorizes each request and ships a per-request audit record.

// Core subsystems
pub mod config;
pub mod gateway;
pub mod http;
pub mod net;
pub mod proxy;

// Request pipeline
pub mod authz;
pub mod buffer;
pub mod certs;
pub mod record;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBuilder};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
