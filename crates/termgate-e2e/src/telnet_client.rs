//! Minimal line-mode telnet client for driving the gateway

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const ESC: u8 = 0x1b;
const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DONT: u8 = 254;

/// Default bound on each wait for gateway output
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A client connection to the gateway, plain or TLS
///
/// Raw bytes are kept so tests can check both the painted text and the
/// telnet option commands.
pub struct TelnetClient<S = TcpStream> {
    stream: S,
    pending: Vec<u8>,
}

impl TelnetClient<TcpStream> {
    pub async fn connect(addr: std::net::SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        Ok(Self::new(stream))
    }
}

impl<S> TelnetClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Read until `needle` appears in the raw byte stream
    ///
    /// Returns everything up to and including the needle; later bytes stay
    /// buffered for the next call.
    pub async fn read_until_bytes(&mut self, needle: &[u8]) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        let mut buf = [0u8; 4096];

        loop {
            if let Some(pos) = find(&self.pending, needle) {
                let rest = self.pending.split_off(pos + needle.len());
                return Ok(std::mem::replace(&mut self.pending, rest));
            }

            let n = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .with_context(|| {
                    format!(
                        "Timed out waiting for {:?}; received {:?}",
                        String::from_utf8_lossy(needle),
                        visible_text(&self.pending)
                    )
                })??;
            if n == 0 {
                bail!(
                    "Connection closed before {:?}; received {:?}",
                    String::from_utf8_lossy(needle),
                    visible_text(&self.pending)
                );
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    /// Read until `needle` appears in the text, with telnet commands removed
    pub async fn read_until(&mut self, needle: &str) -> Result<String> {
        let raw = self.read_until_bytes(needle.as_bytes()).await?;
        Ok(visible_text(&raw))
    }

    /// Read the next full menu screen, up to its input prompt
    pub async fn read_screen(&mut self) -> Result<String> {
        self.read_until("==> ").await
    }

    /// Wait for the gateway to leave screen mode before relaying
    pub async fn read_unnegotiate(&mut self) -> Result<()> {
        self.read_until_bytes(&[IAC, DONT, 3]).await.map(|_| ())
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read exactly `len` bytes after whatever is buffered
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        while self.pending.len() < len {
            let mut buf = [0u8; 4096];
            let n = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut buf))
                .await
                .context("Timed out reading relayed data")??;
            if n == 0 {
                bail!("Connection closed after {} of {} bytes", self.pending.len(), len);
            }
            self.pending.extend_from_slice(&buf[..n]);
        }
        let rest = self.pending.split_off(len);
        Ok(std::mem::replace(&mut self.pending, rest))
    }

    /// Wait for the gateway to close the connection; returns any trailing bytes
    pub async fn read_to_close(&mut self) -> Result<Vec<u8>> {
        let mut rest = std::mem::take(&mut self.pending);
        tokio::time::timeout(READ_TIMEOUT, self.stream.read_to_end(&mut rest))
            .await
            .context("Timed out waiting for the gateway to close")??;
        Ok(rest)
    }

    /// Half-close the client side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Strip telnet command sequences and ANSI escapes from raw gateway output
pub fn visible_text(raw: &[u8]) -> String {
    let mut text = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == ESC && raw.get(i + 1) == Some(&b'[') {
            // CSI runs until a final byte in 0x40..=0x7e
            i += 2;
            while i < raw.len() && !(0x40..=0x7e).contains(&raw[i]) {
                i += 1;
            }
            i += 1;
            continue;
        }
        if raw[i] != IAC {
            text.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1) {
            Some(&SB) => {
                // Skip to IAC SE
                i += 2;
                while i + 1 < raw.len() && !(raw[i] == IAC && raw[i + 1] == SE) {
                    i += 1;
                }
                i += 2;
            }
            Some(&cmd) if (WILL..=DONT).contains(&cmd) => i += 3,
            _ => i += 2,
        }
    }
    String::from_utf8_lossy(&text).into_owned()
}
