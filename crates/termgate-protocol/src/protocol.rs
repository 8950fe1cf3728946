use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::CodecError;
use crate::screen::{Response, ScreenRequest};

/// A duplex byte stream a screen protocol can drive
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Errors from screen protocol operations
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by client")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Terminal protocol operations consumed by the session orchestrator
///
/// Implementations are shared by every session, so all per-connection state
/// lives in the connection passed to each call.
#[async_trait]
pub trait ScreenProtocol: Send + Sync {
    /// Bring a raw connection into screen mode
    async fn negotiate(&self, conn: &mut dyn Connection) -> Result<(), ProtocolError>;

    /// Show a screen and wait for a response
    ///
    /// Keys in `cancel_keys` return at once. Keys in `accept_keys` return only
    /// once the field rules pass; failures are shown in the error field and the
    /// client is asked again. Other keys re-show the screen.
    async fn render_and_await(
        &self,
        request: ScreenRequest<'_>,
        conn: &mut dyn Connection,
    ) -> Result<Response, ProtocolError>;

    /// Take the connection back out of screen mode before relaying
    async fn unnegotiate(
        &self,
        conn: &mut dyn Connection,
        timeout: Duration,
    ) -> Result<(), ProtocolError>;
}
