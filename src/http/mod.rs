//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper-util auto connection, CONNECT dispatch, Axum layers)
//!     → request.rs (connection facts, request id, cookies)
//!     → gateway (reverse or forward proxy)
//!     → response.rs (responses the gateway writes itself)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{ClientConn, Intercepted, REQUEST_ID};
pub use server::{HttpServer, Reloader, ServerError};
