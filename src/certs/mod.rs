//! X.509 material for TLS interception.
//!
//! # Data Flow
//! ```text
//! [ca] section / PEM files
//!     → store.rs (load CA bundle: PEM + params + key)
//!     → signer.rs (per-name leaf, cached)
//!     → net::tls (ServerConfig for one handshake)
//!
//! issue.rs: create_ca / create_sa / create_ce / is_pem_expired
//! profile.rs: named profiles (expiry, key size, subject)
//! ```
//!
//! # Design Decisions
//! - RSA keys, signature algorithm chosen by key size
//! - No eviction: the leaf cache grows with the set of names seen
//! - Signing runs on the blocking pool, never inside a handshake callback

pub mod issue;
pub mod profile;
pub mod signer;
pub mod store;

pub use issue::{create_ca, create_ce, create_sa, is_pem_expired, is_pem_expired_at};
pub use profile::{CertProfile, CertProfiles, Subject};
pub use signer::LeafSigner;
pub use store::CaBundle;

/// PEM-encoded certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertBundle {
    pub crt_pem: String,
    pub key_pem: String,
}

/// Errors from certificate creation, loading and signing.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("certificate profile {0:?} not found and no default profile")]
    MissingProfile(String),

    #[error("invalid expiry {0:?}: expected <n>h, <n>d or <n>y")]
    InvalidExpiry(String),

    #[error("cannot derive common name from {dns} DNS names and {ips} IP addresses")]
    MissingCommonName { dns: usize, ips: usize },

    #[error("invalid subject alternative name {0:?}")]
    InvalidName(String),

    #[error("x509 generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("PEM parse failed: {0}")]
    Pem(String),

    #[error("TLS key rejected: {0}")]
    Tls(String),

    #[error("signing task failed: {0}")]
    Join(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
