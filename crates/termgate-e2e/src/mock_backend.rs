//! Mock backend hosts for E2E tests
//!
//! A backend listens on an ephemeral port, optionally behind TLS, and either
//! echoes, answers with fixed bytes, or records what the gateway relays to it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

use crate::certificates::TestCertificates;

/// Behavior of a mock backend connection
#[derive(Clone, Debug)]
pub enum BackendMode {
    /// Echo back all received data
    Echo,
    /// Send a greeting as soon as the connection opens, then echo
    Greeting(Vec<u8>),
    /// Read once, send a fixed response, then close
    FixedResponse(Vec<u8>),
    /// Record everything until the gateway closes its side
    Accumulate,
}

/// A finished backend connection
#[derive(Clone, Debug)]
pub struct RecordedConnection {
    /// All data received on this connection
    pub received_data: Vec<u8>,
    /// Peer address
    pub peer_addr: SocketAddr,
    /// Whether the connection was TLS
    pub tls: bool,
}

/// A mock backend host
pub struct MockBackend {
    addr: SocketAddr,
    connections: Arc<RwLock<Vec<RecordedConnection>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MockBackend {
    /// Start an echo backend
    pub async fn start() -> Self {
        Self::start_with_mode(BackendMode::Echo).await
    }

    /// Start a plain backend with a specific mode
    pub async fn start_with_mode(mode: BackendMode) -> Self {
        Self::spawn(mode, None).await
    }

    /// Start a TLS backend presenting the test server certificate
    pub async fn start_tls(mode: BackendMode, certs: &TestCertificates) -> Self {
        let acceptor = TlsAcceptor::from(Arc::new(certs.server_config()));
        Self::spawn(mode, Some(acceptor)).await
    }

    async fn spawn(mode: BackendMode, acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().unwrap();

        let connections: Arc<RwLock<Vec<RecordedConnection>>> = Arc::new(RwLock::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let connections_clone = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Mock backend shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        let (stream, peer_addr) = match result {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::error!("Mock backend accept error: {}", e);
                                break;
                            }
                        };
                        let connections = connections_clone.clone();
                        let mode = mode.clone();
                        let acceptor = acceptor.clone();

                        tokio::spawn(async move {
                            match acceptor {
                                None => {
                                    let received = serve(stream, mode).await;
                                    record(&connections, received, peer_addr, false);
                                }
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        let received = serve(tls_stream, mode).await;
                                        record(&connections, received, peer_addr, true);
                                    }
                                    Err(e) => {
                                        tracing::debug!("Mock backend TLS handshake failed: {}", e);
                                    }
                                },
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the address this backend is listening on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Get all finished connections
    pub fn get_connections(&self) -> Vec<RecordedConnection> {
        self.connections.read().clone()
    }

    /// Get finished connection count
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Wait until `count` connections have finished, or the timeout passes
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.connection_count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.connection_count() >= count
    }

    /// Shutdown the backend
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

fn record(
    connections: &RwLock<Vec<RecordedConnection>>,
    received_data: Vec<u8>,
    peer_addr: SocketAddr,
    tls: bool,
) {
    connections.write().push(RecordedConnection {
        received_data,
        peer_addr,
        tls,
    });
}

async fn serve<S>(mut stream: S, mode: BackendMode) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut received_data = Vec::new();
    let mut buf = [0u8; 4096];

    let echo = match mode {
        BackendMode::Echo => true,
        BackendMode::Greeting(greeting) => {
            if let Err(e) = stream.write_all(&greeting).await {
                tracing::error!("Greeting write error: {}", e);
                return received_data;
            }
            true
        }
        BackendMode::FixedResponse(response) => {
            if let Ok(n) = stream.read(&mut buf).await {
                received_data.extend_from_slice(&buf[..n]);
            }
            if let Err(e) = stream.write_all(&response).await {
                tracing::error!("Fixed response write error: {}", e);
            }
            let _ = stream.shutdown().await;
            return received_data;
        }
        BackendMode::Accumulate => false,
    };

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                received_data.extend_from_slice(&buf[..n]);
                if echo {
                    if let Err(e) = stream.write_all(&buf[..n]).await {
                        tracing::error!("Echo write error: {}", e);
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Mock backend read error: {}", e);
                break;
            }
        }
    }

    received_data
}
