//! Server-side TLS: static PEM certificates and per-name leaves.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::server::{Acceptor, ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::{LazyConfigAcceptor, TlsAcceptor};

use crate::certs::{CertError, LeafSigner};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("tls io: {0}")]
    Io(#[from] std::io::Error),

    #[error("no certificate found in {0}")]
    NoCertificate(String),

    #[error("no private key found in {0}")]
    NoKey(String),

    #[error("tls config: {0}")]
    Rustls(#[from] rustls::Error),

    #[error(transparent)]
    Certificate(#[from] CertError),
}

fn builder() -> Result<rustls::ConfigBuilder<ServerConfig, rustls::WantsVerifier>, TlsError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    Ok(ServerConfig::builder_with_provider(provider).with_safe_default_protocol_versions()?)
}

/// Server config from a PEM certificate chain and private key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert_path.display().to_string()));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| TlsError::NoKey(key_path.display().to_string()))?;

    let mut config = builder()?.with_no_client_auth().with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Always answers with one already-signed leaf.
#[derive(Debug)]
struct FixedLeaf(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedLeaf {
    fn resolve(&self, _hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Server config presenting `leaf`, HTTP/1.1 only.
pub fn leaf_server_config(leaf: Arc<CertifiedKey>) -> Result<Arc<ServerConfig>, TlsError> {
    let mut config = builder()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(FixedLeaf(leaf)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Read the ClientHello, sign (or reuse) a leaf for its SNI and finish the
/// handshake. `fallback` names the leaf when the client sent no SNI.
pub async fn accept_with_leaf<IO>(
    io: IO,
    signer: &Arc<LeafSigner>,
    fallback: &str,
) -> Result<TlsStream<IO>, TlsError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let start = LazyConfigAcceptor::new(Acceptor::default(), io).await?;
    let name = start
        .client_hello()
        .server_name()
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string());

    let leaf = signer.leaf_async(&name).await?;
    let config = leaf_server_config(leaf)?;
    Ok(start.into_stream(config).await?)
}

/// How the listener terminates TLS.
#[derive(Clone)]
pub enum ListenerTls {
    Static(TlsAcceptor),
    Dynamic(Arc<LeafSigner>),
}

impl ListenerTls {
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let config = load_server_config(cert_path, key_path)?;
        Ok(Self::Static(TlsAcceptor::from(Arc::new(config))))
    }

    /// Handshake on an accepted connection. Dynamic leaves fall back to the
    /// local address when there is no SNI.
    pub async fn accept<IO>(&self, io: IO, local: SocketAddr) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Self::Static(acceptor) => Ok(acceptor.accept(io).await?),
            Self::Dynamic(signer) => accept_with_leaf(io, signer, &local.ip().to_string()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertProfiles;

    #[tokio::test]
    async fn leaf_config_speaks_http1_only() {
        let signer = LeafSigner::new(CertProfiles::default(), "default", None);
        let leaf = signer.leaf("dev1.com").unwrap();
        let config = leaf_server_config(leaf).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn missing_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = crate::certs::create_ce(
            &CertProfiles::default(),
            "default",
            "",
            &["localhost".to_string()],
            &[],
            None,
        )
        .unwrap();

        let cert = dir.path().join("tls.crt");
        let key = dir.path().join("tls.key");
        std::fs::write(&cert, &leaf.crt_pem).unwrap();
        std::fs::write(&key, "").unwrap();

        assert!(matches!(load_server_config(&cert, &key), Err(TlsError::NoKey(_))));

        std::fs::write(&key, &leaf.key_pem).unwrap();
        assert!(load_server_config(&cert, &key).is_ok());
    }
}
