//! Outbound connections to backend targets, plain or TLS
//!
//! The TCP connect and the TLS handshake are each bounded by the dialer's
//! connect timeout.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::ClientConfig;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use termgate_common::{load_target_config, server_name, TlsError};

use crate::config::ServerTarget;

/// Bound on establishing the TCP connection to a backend, and on its TLS handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors reaching a backend target
#[derive(Debug, Error)]
pub enum DialError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connecting to {addr} timed out after {after:?}")]
    Timeout { addr: String, after: Duration },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {host} timed out after {after:?}")]
    HandshakeTimeout { host: String, after: Duration },
}

/// An established backend connection, plain or TLS-wrapped
pub enum Backend {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Backend {
    pub fn is_tls(&self) -> bool {
        matches!(self, Backend::Tls(_))
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Plain(stream) => f.debug_tuple("Plain").field(&stream.peer_addr().ok()).finish(),
            Backend::Tls(stream) => f
                .debug_tuple("Tls")
                .field(&stream.get_ref().0.peer_addr().ok())
                .finish(),
        }
    }
}

impl AsyncRead for Backend {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Backend::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Backend::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Backend {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Backend::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Backend::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Backend::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Backend::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Backend::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Backend::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens connections to configured targets
///
/// Client TLS configs are built once and shared by every session.
#[derive(Clone)]
pub struct Dialer {
    verified: Arc<ClientConfig>,
    insecure: Arc<ClientConfig>,
    connect_timeout: Duration,
}

impl Dialer {
    pub fn new() -> Result<Self, TlsError> {
        Ok(Self {
            verified: Arc::new(load_target_config(false)?),
            insecure: Arc::new(load_target_config(true)?),
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to `target`, wrapping in TLS when the target asks for it
    pub async fn connect(&self, target: &ServerTarget) -> Result<Backend, DialError> {
        let addr = target.address();

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DialError::Timeout {
                addr: addr.clone(),
                after: self.connect_timeout,
            })?
            .map_err(|source| DialError::Connect {
                addr: addr.clone(),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        if !target.use_tls {
            tracing::debug!("Connected to {}", addr);
            return Ok(Backend::Plain(stream));
        }

        let config = if target.ignore_cert_validation {
            self.insecure.clone()
        } else {
            self.verified.clone()
        };
        let host = target.host.trim();
        let name = server_name(host)?;

        let handshake = TlsConnector::from(config).connect(name, stream);
        let tls_stream = tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| DialError::HandshakeTimeout {
                host: host.to_string(),
                after: self.connect_timeout,
            })?
            .map_err(|source| DialError::Handshake {
                host: host.to_string(),
                source,
            })?;

        tracing::debug!(
            verified = !target.ignore_cert_validation,
            "TLS established with {}",
            addr
        );
        Ok(Backend::Tls(Box::new(tls_stream)))
    }
}
