//! Leaf signer with a per-name cache.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;

use super::issue::create_ce;
use super::profile::CertProfiles;
use super::{CaBundle, CertError};
use crate::observability::metrics;

/// Signs leaves on demand and keeps them for the life of the process.
///
/// Two concurrent misses for the same name may both sign; whichever lands
/// in the map first is the one every later caller sees.
pub struct LeafSigner {
    profiles: CertProfiles,
    profile: String,
    ca: Option<CaBundle>,
    append_ca: bool,
    cache: DashMap<String, Arc<CertifiedKey>>,
    signed: AtomicU64,
    hits: AtomicU64,
}

impl LeafSigner {
    /// `ca = None` makes every leaf self-signed.
    pub fn new(profiles: CertProfiles, profile: impl Into<String>, ca: Option<CaBundle>) -> Self {
        Self {
            profiles,
            profile: profile.into(),
            ca,
            append_ca: false,
            cache: DashMap::new(),
            signed: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Append the CA certificate to every leaf chain (intermediate deployments).
    pub fn with_chain(mut self, append_ca: bool) -> Self {
        self.append_ca = append_ca;
        self
    }

    /// Cached leaf for `name`, signing it on a miss.
    ///
    /// Blocks while signing; async callers use [`LeafSigner::leaf_async`].
    pub fn leaf(&self, name: &str) -> Result<Arc<CertifiedKey>, CertError> {
        let key = cache_key(name);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let signed = Arc::new(self.sign(&key)?);
        let entry = self.cache.entry(key).or_insert(signed).clone();
        Ok(entry)
    }

    /// [`LeafSigner::leaf`] with signing moved to the blocking pool.
    pub async fn leaf_async(self: &Arc<Self>, name: &str) -> Result<Arc<CertifiedKey>, CertError> {
        if let Some(hit) = self.lookup(&cache_key(name)) {
            return Ok(hit);
        }

        let signer = Arc::clone(self);
        let name = name.to_string();
        tokio::task::spawn_blocking(move || signer.leaf(&name))
            .await
            .map_err(|e| CertError::Join(e.to_string()))?
    }

    fn lookup(&self, key: &str) -> Option<Arc<CertifiedKey>> {
        let hit = self.cache.get(key).map(|entry| Arc::clone(entry.value()));
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_leaf_lookup(true);
        }
        hit
    }

    fn sign(&self, name: &str) -> Result<CertifiedKey, CertError> {
        let (dns, ips) = match name.parse::<IpAddr>() {
            Ok(ip) => (Vec::new(), vec![ip]),
            Err(_) => (vec![name.to_string()], Vec::new()),
        };

        let leaf = create_ce(&self.profiles, &self.profile, "", &dns, &ips, self.ca.as_ref())?;
        self.signed.fetch_add(1, Ordering::Relaxed);
        metrics::record_leaf_lookup(false);
        tracing::debug!(name = %name, "leaf certificate signed");

        let mut chain_pem = leaf.crt_pem;
        if self.append_ca {
            if let Some(ca) = &self.ca {
                chain_pem.push_str(ca.crt_pem());
            }
        }
        certified_key(&chain_pem, &leaf.key_pem)
    }

    /// Leaves signed so far.
    pub fn signed(&self) -> u64 {
        self.signed.load(Ordering::Relaxed)
    }

    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn ca(&self) -> Option<&CaBundle> {
        self.ca.as_ref()
    }
}

impl std::fmt::Debug for LeafSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafSigner")
            .field("profile", &self.profile)
            .field("has_ca", &self.ca.is_some())
            .field("cached", &self.cache.len())
            .finish()
    }
}

fn cache_key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Build a rustls signing identity from PEM chain and key.
pub fn certified_key(chain_pem: &str, key_pem: &str) -> Result<CertifiedKey, CertError> {
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut chain_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::Pem(e.to_string()))?;
    if chain.is_empty() {
        return Err(CertError::Pem("no certificates found".into()));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| CertError::Pem(e.to_string()))?
        .ok_or_else(|| CertError::Pem("no private key found".into()))?;

    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| CertError::Tls(e.to_string()))?;

    Ok(CertifiedKey::new(chain, signing_key))
}
