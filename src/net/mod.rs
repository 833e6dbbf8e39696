//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection cap)
//!     → tls.rs (optional: static PEM or per-SNI leaf)
//!     → connection.rs (tracked until closed, drained on shutdown)
//!     → hand off to the HTTP server
//! ```

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use tls::{ListenerTls, TlsError};
