//! Proxy subsystem.
//!
//! # Data Flow
//! ```text
//! reverse mode:  request → ReverseProxy (fixed upstream)
//! forward mode:  CONNECT → ForwardProxy::connect → TLS with a signed leaf
//!                    → decrypted request → ProxyCache[https://host:port]
//!                plain request → ProxyCache[origin of the URI or Host]
//! ```
//!
//! Every [`ReverseProxy`] shares the gateway's upstream client, authorizer,
//! record pool and buffer pool.

pub mod cache;
pub mod forward;
pub mod reverse;
pub mod rewrite;
pub mod stream;
pub mod transport;
pub mod upgrade;

pub use cache::ProxyCache;
pub use forward::{parse_connect_target, ForwardProxy};
pub use reverse::{Pools, ReverseProxy};
pub use rewrite::{Hook, ProxyRequest};
pub use stream::FlushPolicy;
pub use transport::{build_client, UpstreamClient};
