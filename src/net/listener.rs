//! TCP listener construction.
//!
//! # Responsibilities
//! - Resolve the configured host to a bind address
//! - Bind with the configured accept backlog (`max_queued`)
//! - Hand a non-blocking std listener to the HTTP server

use std::net::SocketAddr;
use tokio::net::TcpSocket;
use url::{Host, Url};

use crate::config::ServerSettings;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The configured host could not be understood.
    #[error("Invalid host '{0}'")]
    InvalidHost(String),
    /// Name resolution failed or produced no address.
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Extract the bind host from the configured `host`, which may carry a scheme
/// (`http://127.0.0.1`) or be a bare host name.
pub fn bind_host(host: &str) -> Result<String, ListenerError> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| ListenerError::InvalidHost(host.to_string()))?;
    match url.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(ListenerError::InvalidHost(host.to_string())),
    }
}

/// Resolve the bind address for the given settings.
pub async fn resolve_bind_addr(settings: &ServerSettings) -> Result<SocketAddr, ListenerError> {
    let host = bind_host(&settings.host)?;
    let mut addrs = tokio::net::lookup_host((host.clone(), settings.port))
        .await
        .map_err(|source| ListenerError::Resolve {
            host: host.clone(),
            source,
        })?;

    addrs.next().ok_or_else(|| ListenerError::Resolve {
        host,
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
    })
}

/// Bind a listening socket with the configured backlog.
pub async fn bind(settings: &ServerSettings) -> Result<std::net::TcpListener, ListenerError> {
    let addr = resolve_bind_addr(settings).await?;
    let bind_err = |source| ListenerError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let listener = socket.listen(settings.max_queued).map_err(bind_err)?;

    let std_listener = listener.into_std().map_err(bind_err)?;
    std_listener.set_nonblocking(true).map_err(bind_err)?;

    tracing::info!(
        address = %addr,
        backlog = settings.max_queued,
        "Listener bound"
    );

    Ok(std_listener)
}
