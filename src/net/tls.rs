//! TLS configuration and certificate loading.

use axum_server::tls_rustls::RustlsConfig;
use std::path::{Path, PathBuf};

use crate::config::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("secure channel requested but no [server.tls] section configured")]
    NotConfigured,
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("invalid PEM in {path:?}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rustls rejected the certificate/key pair: {0}")]
    Rustls(#[source] std::io::Error),
}

/// Load TLS configuration from certificate and key files.
///
/// The PEM files are checked up front so a bad path or an empty file is
/// reported precisely instead of as a generic rustls error.
pub async fn load_tls_config(config: Option<&TlsConfig>) -> Result<RustlsConfig, TlsError> {
    let config = config.ok_or(TlsError::NotConfigured)?;

    let cert = read(&config.cert_path).await?;
    let key = read(&config.key_path).await?;

    let certs = rustls_pemfile::certs(&mut cert.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            path: config.cert_path.clone(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(config.cert_path.clone()));
    }

    match rustls_pemfile::private_key(&mut key.as_slice()) {
        Ok(Some(_)) => {}
        Ok(None) => return Err(TlsError::NoPrivateKey(config.key_path.clone())),
        Err(source) => {
            return Err(TlsError::Pem {
                path: config.key_path.clone(),
                source,
            })
        }
    }

    RustlsConfig::from_pem(cert, key).await.map_err(TlsError::Rustls)
}

async fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path).await.map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}
