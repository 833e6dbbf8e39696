//! Header policy applied between client and upstream.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → headers.rs (strip hop-by-hop, keep Upgrade / Te: trailers intent)
//!     → headers.rs (X-Forwarded-* per director or rewrite hook)
//!     → authorizer
//! Upstream response:
//!     → headers.rs (strip hop-by-hop before copying to the client)
//! ```

pub mod headers;
