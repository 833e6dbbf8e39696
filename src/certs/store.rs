//! CA bundle: PEM text plus the issuer (subject name and key) used for signing.

use std::fmt;
use std::path::Path;

use rcgen::{CertificateParams, Issuer, KeyPair};

use super::{CertBundle, CertError};

/// A CA (root or intermediate) able to issue certificates.
pub struct CaBundle {
    bundle: CertBundle,
    issuer: Issuer<'static, KeyPair>,
}

impl CaBundle {
    pub(crate) fn from_parts(bundle: CertBundle, params: CertificateParams, key: KeyPair) -> Self {
        Self {
            bundle,
            issuer: Issuer::new(params, key),
        }
    }

    /// Parse a CA certificate and its private key from PEM.
    pub fn from_pem(crt_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let key = KeyPair::from_pem(key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(crt_pem, key)?;
        Ok(Self {
            bundle: CertBundle {
                crt_pem: crt_pem.to_string(),
                key_pem: key_pem.to_string(),
            },
            issuer,
        })
    }

    /// Load a CA from certificate and key files.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CertError> {
        let crt_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        let ca = Self::from_pem(&crt_pem, &key_pem)?;

        tracing::info!(cert = ?cert_path, "CA certificate loaded");
        Ok(ca)
    }

    /// Write certificate and key PEM to disk.
    pub fn save(&self, cert_path: &Path, key_path: &Path) -> Result<(), CertError> {
        std::fs::write(cert_path, &self.bundle.crt_pem)?;
        std::fs::write(key_path, &self.bundle.key_pem)?;
        Ok(())
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }

    pub fn crt_pem(&self) -> &str {
        &self.bundle.crt_pem
    }

    pub fn bundle(&self) -> &CertBundle {
        &self.bundle
    }
}

impl fmt::Debug for CaBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaBundle")
            .field("crt_pem_len", &self.bundle.crt_pem.len())
            .finish_non_exhaustive()
    }
}
