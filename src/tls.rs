//! TLS acceptance with ALPN `h2`: certificates are loaded once at startup and can be
//! hot-reloaded; reload swaps an `Arc` so a connection already mid-handshake keeps using the
//! config it started with.

use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio_rustls::rustls::{self, Certificate, PrivateKey};
use tokio_rustls::TlsAcceptor;

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} contains no PEM-encoded certificates")]
    NoCertificates { path: String },
    #[error("{path} contains no usable private key")]
    NoPrivateKey { path: String },
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn read_certs(path: &Path) -> Result<Vec<Certificate>, TlsConfigError> {
    let file = std::fs::File::open(path).map_err(|source| TlsConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .map_err(|source| TlsConfigError::Io {
            path: path.display().to_string(),
            source,
        })?
        .into_iter()
        .map(Certificate)
        .collect::<Vec<_>>();
    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates {
            path: path.display().to_string(),
        });
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKey, TlsConfigError> {
    let file = std::fs::File::open(path).map_err(|source| TlsConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    // Try PKCS#8 first, then fall back to the legacy RSA (PKCS#1) format.
    let pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut reader).unwrap_or_default();
    if let Some(key) = pkcs8.into_iter().next() {
        return Ok(PrivateKey(key));
    }
    let file = std::fs::File::open(path).map_err(|source| TlsConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let rsa = rustls_pemfile::rsa_private_keys(&mut reader).unwrap_or_default();
    rsa.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TlsConfigError::NoPrivateKey {
            path: path.display().to_string(),
        })
}

/// The lowest TLS protocol version the server will negotiate. Defaults to TLS 1.2, matching
/// what most load balancers and gRPC clients still expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinTlsVersion {
    Tls12,
    Tls13,
}

impl Default for MinTlsVersion {
    fn default() -> Self {
        MinTlsVersion::Tls12
    }
}

impl MinTlsVersion {
    fn supported_versions(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        match self {
            MinTlsVersion::Tls12 => &[&rustls::version::TLS12, &rustls::version::TLS13],
            MinTlsVersion::Tls13 => &[&rustls::version::TLS13],
        }
    }
}

fn build_server_config(
    cert_path: &Path,
    key_path: &Path,
    client_ca_path: Option<&Path>,
    require_client_cert: bool,
    min_version: MinTlsVersion,
) -> Result<rustls::ServerConfig, TlsConfigError> {
    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;

    let builder = rustls::ServerConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(min_version.supported_versions())?;

    let mut config = match client_ca_path {
        Some(ca_path) => {
            let ca_certs = read_certs(ca_path)?;
            let mut roots = rustls::RootCertStore::empty();
            for cert in &ca_certs {
                roots.add(cert)?;
            }
            let verifier = if require_client_cert {
                rustls::server::AllowAnyAuthenticatedClient::new(roots)
            } else {
                rustls::server::AllowAnyAnonymousOrAuthenticatedClient::new(roots)
            };
            builder
                .with_client_cert_verifier(Arc::new(verifier))
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

/// Loaded TLS material plus the knobs to build it with. Kept separate from `ServerConfig` so
/// `reload` can be called with a fresh set of paths.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
    pub client_ca_path: Option<std::path::PathBuf>,
    pub require_client_cert: bool,
    pub min_version: MinTlsVersion,
}

pub struct TlsConfig {
    current: RwLock<Arc<rustls::ServerConfig>>,
}

impl TlsConfig {
    pub fn load(material: &TlsMaterial) -> Result<Self, TlsConfigError> {
        let config = build_server_config(
            &material.cert_path,
            &material.key_path,
            material.client_ca_path.as_deref(),
            material.require_client_cert,
            material.min_version,
        )?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Hand a fresh acceptor to the caller — connections already in progress hold their own
    /// `Arc` clone from an earlier call and are unaffected by a subsequent `reload`.
    pub fn acceptor(&self) -> TlsAcceptor {
        let config = self.current.read().expect("tls config lock poisoned").clone();
        TlsAcceptor::from(config)
    }

    pub fn reload(&self, material: &TlsMaterial) -> Result<(), TlsConfigError> {
        let config = build_server_config(
            &material.cert_path,
            &material.key_path,
            material.client_ca_path.as_deref(),
            material.require_client_cert,
            material.min_version,
        )?;
        *self.current.write().expect("tls config lock poisoned") = Arc::new(config);
        Ok(())
    }
}
