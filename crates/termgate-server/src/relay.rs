//! Bidirectional byte relay between a client and its chosen backend

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

/// How long a single read may block before the stop signal is checked again
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bytes moved per read
pub const RELAY_BUFFER_SIZE: usize = 1024;

/// One leg of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Errors that end a relay
///
/// These are routine: a peer hanging up mid-write shows up here.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Read failed on {direction}: {source}")]
    Read {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed on {direction}: {source}")]
    Write {
        direction: Direction,
        #[source]
        source: std::io::Error,
    },

    #[error("Relay task for {direction} failed: {message}")]
    Task { direction: Direction, message: String },
}

impl RelayError {
    pub fn direction(&self) -> Direction {
        match self {
            RelayError::Read { direction, .. }
            | RelayError::Write { direction, .. }
            | RelayError::Task { direction, .. } => *direction,
        }
    }
}

/// Why a direction stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionEnd {
    Eof,
    Stopped,
}

/// Copies bytes both ways until either side finishes
#[derive(Debug, Clone)]
pub struct Relay {
    poll_interval: Duration,
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            poll_interval: READ_POLL_INTERVAL,
        }
    }
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the read deadline; also bounds how long a stopped direction lingers
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Relay until one direction ends, then stop the other and wait for it
    ///
    /// Both streams are dropped before this returns. The first error seen is
    /// returned; a clean end-of-stream on either side is `Ok`. Dropping the
    /// returned future aborts both directions.
    pub async fn run<C, S>(&self, client: C, server: S) -> Result<(), RelayError>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let upstream_stop = CancellationToken::new();
        let downstream_stop = CancellationToken::new();

        let mut upstream = AbortOnDropHandle::new(tokio::spawn(pump(
            client_read,
            server_write,
            Direction::ClientToServer,
            upstream_stop.clone(),
            self.poll_interval,
        )));
        let mut downstream = AbortOnDropHandle::new(tokio::spawn(pump(
            server_read,
            client_write,
            Direction::ServerToClient,
            downstream_stop.clone(),
            self.poll_interval,
        )));

        let (first, remaining, remaining_direction) = tokio::select! {
            result = &mut upstream => {
                downstream_stop.cancel();
                (joined(Direction::ClientToServer, result), downstream, Direction::ServerToClient)
            }
            result = &mut downstream => {
                upstream_stop.cancel();
                (joined(Direction::ServerToClient, result), upstream, Direction::ClientToServer)
            }
        };
        let second = joined(remaining_direction, remaining.await);

        tracing::debug!(first = ?first, second = ?second, "Relay finished");
        first.and(second).map(|_| ())
    }
}

fn joined(
    direction: Direction,
    result: Result<Result<DirectionEnd, RelayError>, JoinError>,
) -> Result<DirectionEnd, RelayError> {
    result.unwrap_or_else(|e| {
        Err(RelayError::Task {
            direction,
            message: e.to_string(),
        })
    })
}

async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    stop: CancellationToken,
    poll_interval: Duration,
) -> Result<DirectionEnd, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::debug!(%direction, "Relay direction started");
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    let mut forwarded: u64 = 0;

    let outcome = loop {
        if stop.is_cancelled() {
            break Ok(DirectionEnd::Stopped);
        }

        let n = match tokio::time::timeout(poll_interval, reader.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => break Ok(DirectionEnd::Eof),
            Ok(Ok(n)) => n,
            Ok(Err(source)) => break Err(RelayError::Read { direction, source }),
        };

        let write = async {
            writer.write_all(&buf[..n]).await?;
            writer.flush().await
        };
        if let Err(source) = write.await {
            break Err(RelayError::Write { direction, source });
        }

        forwarded += n as u64;
        tracing::trace!(%direction, bytes = n, "Relayed data");
    };

    tracing::debug!(%direction, forwarded, outcome = ?outcome, "Relay direction stopped");

    // Pass the end-of-stream on to the far side
    if tokio::time::timeout(poll_interval, writer.shutdown())
        .await
        .is_err()
    {
        tracing::debug!(%direction, "Timed out shutting down writer");
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};
    use tokio::time::Instant;

    fn fast_relay() -> Relay {
        Relay::new().with_poll_interval(Duration::from_millis(20))
    }

    /// Never readable; every write fails
    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Panics on first read
    struct PanickingStream;

    impl AsyncRead for PanickingStream {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            panic!("read exploded");
        }
    }

    impl AsyncWrite for PanickingStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::ClientToServer.to_string(), "client->server");
        assert_eq!(Direction::ServerToClient.to_string(), "server->client");
    }

    #[tokio::test]
    async fn test_relays_both_ways_in_order() {
        let (mut client, client_side) = duplex(4096);
        let (server_side, mut server) = duplex(4096);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, server_side).await });

        client.write_all(b"hello ").await.unwrap();
        client.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 11];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");

        server.write_all(b"reply").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"reply");

        drop(client);
        relay.await.unwrap().unwrap();

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_larger_than_buffer_payload() {
        let (mut client, client_side) = duplex(64 * 1024);
        let (server_side, mut server) = duplex(64 * 1024);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, server_side).await });

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            client.shutdown().await.unwrap();
            client
        });

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let _client = writer.await.unwrap();
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_eof_delivers_in_flight_bytes() {
        let (mut client, client_side) = duplex(4096);
        let (server_side, mut server) = duplex(4096);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, server_side).await });

        server.write_all(b"goodbye").await.unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"goodbye");
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_idle_direction_stops_within_poll_interval() {
        // Client never sends anything; only the server hangs up
        let (_client, client_side) = duplex(4096);
        let (server_side, server) = duplex(4096);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, server_side).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = Instant::now();
        drop(server);

        tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (mut client, client_side) = duplex(4096);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, BrokenStream).await });

        client.write_all(b"x").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .unwrap()
            .unwrap();
        match result {
            Err(RelayError::Write { direction, .. }) => {
                assert_eq!(direction, Direction::ClientToServer)
            }
            other => panic!("expected write error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_direction_is_reported() {
        let (_client, client_side) = duplex(4096);
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            fast_relay().run(client_side, PanickingStream),
        )
        .await
        .unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, RelayError::Task { .. }));
        assert_eq!(err.direction(), Direction::ServerToClient);
    }

    #[tokio::test]
    async fn test_dropping_relay_stops_forwarding() {
        let (mut client, client_side) = duplex(4096);
        let (server_side, mut server) = duplex(4096);
        let relay = tokio::spawn(async move { fast_relay().run(client_side, server_side).await });

        client.write_all(b"before").await.unwrap();
        let mut buf = [0u8; 6];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"before");

        relay.abort();
        assert!(relay.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nothing may move once the owning future is gone
        let _ = client.write_all(b"after-abort").await;
        let mut rest = [0u8; 16];
        match tokio::time::timeout(Duration::from_millis(200), server.read(&mut rest)).await {
            Err(_) => {}
            Ok(Ok(n)) => assert_eq!(n, 0, "forwarded {:?}", &rest[..n]),
            Ok(Err(_)) => {}
        }
    }
}
