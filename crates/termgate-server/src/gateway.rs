use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;
use uuid::Uuid;

use termgate_protocol::Connection;

use crate::session::SessionOrchestrator;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on the client-facing TLS handshake
const TLS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts terminal clients and runs one session per connection
pub struct Gateway {
    orchestrator: Arc<SessionOrchestrator>,
}

impl Gateway {
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Arc<Self> {
        Arc::new(Self { orchestrator })
    }

    /// Bind `addr` and serve plain connections
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.run_with_listener(listener).await
    }

    /// Serve plain connections from an already-bound listener
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tracing::info!("Listening for connections on {}", listener.local_addr()?);

        loop {
            let Some((stream, peer_addr)) = accept(&listener).await else {
                continue;
            };
            let this = self.clone();
            let span = session_span(peer_addr, false);

            tokio::spawn(
                async move {
                    tracing::info!("New connection from {}", peer_addr);
                    this.serve(stream).await;
                }
                .instrument(span),
            );
        }
    }

    /// Bind `addr` and serve TLS connections
    pub async fn run_tls(self: Arc<Self>, addr: SocketAddr, acceptor: TlsAcceptor) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        self.run_tls_with_listener(listener, acceptor).await
    }

    /// Serve TLS connections from an already-bound listener
    pub async fn run_tls_with_listener(
        self: Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
    ) -> Result<()> {
        tracing::info!(
            "Listening for TLS connections on {}",
            listener.local_addr()?
        );

        loop {
            let Some((stream, peer_addr)) = accept(&listener).await else {
                continue;
            };
            let this = self.clone();
            let acceptor = acceptor.clone();
            let span = session_span(peer_addr, true);

            tokio::spawn(
                async move {
                    tracing::info!("New TLS connection from {}", peer_addr);
                    match tokio::time::timeout(TLS_ACCEPT_TIMEOUT, acceptor.accept(stream)).await {
                        Ok(Ok(tls_stream)) => this.serve(tls_stream).await,
                        Ok(Err(e)) => tracing::warn!(step = "accept", "TLS handshake failed: {}", e),
                        Err(_) => tracing::warn!(step = "accept", "TLS handshake timed out"),
                    }
                }
                .instrument(span),
            );
        }
    }

    async fn serve<C>(&self, client: C)
    where
        C: Connection + 'static,
    {
        if let Err(e) = self.orchestrator.run(client).await {
            tracing::warn!(step = e.step(), "Session failed: {}", e);
        }
    }
}

async fn accept(listener: &TcpListener) -> Option<(TcpStream, SocketAddr)> {
    match listener.accept().await {
        Ok(accepted) => Some(accepted),
        Err(e) => {
            tracing::error!("Failed to accept connection: {}", e);
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

fn session_span(peer_addr: SocketAddr, tls: bool) -> tracing::Span {
    tracing::info_span!("session", id = %Uuid::new_v4(), peer = %peer_addr, tls)
}
