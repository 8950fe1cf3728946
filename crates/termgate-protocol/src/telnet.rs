use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use crate::codec::{TelnetLineCodec, DO, DONT, ECHO, IAC, SUPPRESS_GO_AHEAD, WILL, WONT};
use crate::protocol::{Connection, ProtocolError, ScreenProtocol};
use crate::screen::{Key, Response, ScreenRequest};

const CLEAR_SCREEN: &str = "\x1b[0m\x1b[2J\x1b[H";
const PROMPT: &str = "==> ";

/// Line-mode telnet screen protocol
///
/// Screens are painted as text and the client answers with one line per round
/// trip. Attention keys are typed as words: `pf3`/`q`/`quit`, `pf7`/`-`/`<`,
/// `pf8`/`+`/`>`, `clear`. Any other line is Enter with the line as the value of
/// the first writable field.
#[derive(Debug, Clone, Default)]
pub struct LineTelnet;

impl LineTelnet {
    pub fn new() -> Self {
        Self
    }

    /// Map one input line to an attention key
    pub fn classify(line: &str) -> Key {
        match line.trim().to_ascii_lowercase().as_str() {
            "pf3" | "q" | "quit" => Key::Pf(3),
            "pf7" | "-" | "<" => Key::Pf(7),
            "pf8" | "+" | ">" => Key::Pf(8),
            "clear" => Key::Clear,
            other => other
                .strip_prefix("pf")
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| (1..=24).contains(n))
                .map(Key::Pf)
                .unwrap_or(Key::Enter),
        }
    }

    fn paint(request: &ScreenRequest<'_>, values: &HashMap<String, String>) -> String {
        let mut text = String::from(CLEAR_SCREEN);
        for row in request.screen.render_ansi(values) {
            text.push_str(&row);
            text.push('\n');
        }
        text.push_str(PROMPT);
        text
    }
}

#[async_trait]
impl ScreenProtocol for LineTelnet {
    async fn negotiate(&self, conn: &mut dyn Connection) -> Result<(), ProtocolError> {
        let commands = [
            IAC,
            WILL,
            SUPPRESS_GO_AHEAD,
            IAC,
            DO,
            SUPPRESS_GO_AHEAD,
            IAC,
            WONT,
            ECHO,
        ];
        conn.write_all(&commands).await?;
        conn.flush().await?;
        tracing::trace!("Sent line-mode negotiation");
        Ok(())
    }

    async fn render_and_await(
        &self,
        request: ScreenRequest<'_>,
        conn: &mut dyn Connection,
    ) -> Result<Response, ProtocolError> {
        // The CR of the previous answer may have arrived without its LF
        let mut framed = Framed::new(conn, TelnetLineCodec::continuing());
        let mut values = request.values.clone();
        let input_field = request.screen.first_input().map(str::to_string);

        loop {
            let text = Self::paint(&request, &values);
            framed.send(text.as_str()).await?;

            let line = match framed.next().await {
                Some(line) => line?,
                None => return Err(ProtocolError::ConnectionClosed),
            };

            let key = Self::classify(&line);
            tracing::trace!(?key, "Received screen response");

            if request.cancel_keys.contains(&key) {
                return Ok(Response { key, values });
            }

            if !request.accept_keys.contains(&key) {
                continue;
            }

            if key == Key::Enter {
                if let Some(field) = &input_field {
                    values.insert(field.clone(), line.trim().to_string());
                }
            }

            match request.rules.validate(&values) {
                Ok(()) => {
                    values.remove(request.error_field);
                    return Ok(Response { key, values });
                }
                Err(error_text) => {
                    if let Some(field) = &input_field {
                        values.remove(field);
                    }
                    values.insert(request.error_field.to_string(), error_text);
                }
            }
        }
    }

    async fn unnegotiate(
        &self,
        conn: &mut dyn Connection,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let commands = [
            IAC,
            WONT,
            SUPPRESS_GO_AHEAD,
            IAC,
            DONT,
            SUPPRESS_GO_AHEAD,
        ];

        let write = async {
            conn.write_all(&commands).await?;
            conn.write_all(CLEAR_SCREEN.as_bytes()).await?;
            conn.flush().await
        };
        tokio::time::timeout(timeout, write)
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))??;

        // Swallow the client's option replies so they never reach the backend
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            match tokio::time::timeout_at(deadline, conn.read(&mut buf)).await {
                Err(_) => return Ok(()),
                Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed),
                Ok(Ok(n)) => tracing::trace!(bytes = n, "Discarded client bytes while unnegotiating"),
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::{Field, FieldRules, Rules, Screen, Validator};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn menu() -> (Screen, Rules) {
        let mut screen = Screen::new();
        screen.push(Field::text(0, 0, "MENU"));
        screen.push(Field::input(2, 32, "input", 3));
        screen.push(Field::named(20, 0, "errormsg"));

        let mut rules = Rules::new();
        rules.insert(
            "input",
            FieldRules {
                validator: Some(Validator::IntegerRange { min: 1, max: 2 }),
                error_text: "Pick 1 or 2".to_string(),
            },
        );
        (screen, rules)
    }

    async fn read_until(stream: &mut DuplexStream, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&seen).contains(needle) {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed before {:?}", needle);
            seen.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    #[test]
    fn test_classify() {
        assert_eq!(LineTelnet::classify("q"), Key::Pf(3));
        assert_eq!(LineTelnet::classify(" PF3 "), Key::Pf(3));
        assert_eq!(LineTelnet::classify("+"), Key::Pf(8));
        assert_eq!(LineTelnet::classify("<"), Key::Pf(7));
        assert_eq!(LineTelnet::classify("pf12"), Key::Pf(12));
        assert_eq!(LineTelnet::classify("clear"), Key::Clear);
        assert_eq!(LineTelnet::classify("7"), Key::Enter);
        assert_eq!(LineTelnet::classify("pf99"), Key::Enter);
        assert_eq!(LineTelnet::classify(""), Key::Enter);
    }

    #[tokio::test]
    async fn test_negotiate_sends_options() {
        let (mut client, mut server) = duplex(256);
        LineTelnet::new().negotiate(&mut server).await.unwrap();

        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[..3], [IAC, WILL, SUPPRESS_GO_AHEAD]);
        assert_eq!(buf[6..], [IAC, WONT, ECHO]);
    }

    #[tokio::test]
    async fn test_render_reprompts_until_valid() {
        let (mut client, mut server) = duplex(8192);
        let (screen, rules) = menu();
        let values = HashMap::new();

        let task = tokio::spawn(async move {
            let request = ScreenRequest {
                screen: &screen,
                rules: &rules,
                values: &values,
                accept_keys: &[Key::Enter],
                cancel_keys: &[Key::Pf(3)],
                error_field: "errormsg",
                error_row: 2,
                error_col: 33,
            };
            LineTelnet::new()
                .render_and_await(request, &mut server)
                .await
        });

        read_until(&mut client, PROMPT).await;
        client.write_all(b"9\r\n").await.unwrap();
        let second = read_until(&mut client, "Pick 1 or 2").await;
        assert!(second.contains("MENU"));

        client.write_all(b"2\r\n").await.unwrap();
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.key, Key::Enter);
        assert_eq!(response.value("input"), Some("2"));
        assert_eq!(response.value("errormsg"), None);
    }

    #[tokio::test]
    async fn test_render_cancel_skips_rules() {
        let (mut client, mut server) = duplex(8192);
        let (screen, rules) = menu();
        let values = HashMap::new();

        let task = tokio::spawn(async move {
            let request = ScreenRequest {
                screen: &screen,
                rules: &rules,
                values: &values,
                accept_keys: &[Key::Enter],
                cancel_keys: &[Key::Pf(3), Key::Pf(8)],
                error_field: "errormsg",
                error_row: 2,
                error_col: 33,
            };
            LineTelnet::new()
                .render_and_await(request, &mut server)
                .await
        });

        read_until(&mut client, PROMPT).await;
        // Unlisted key just repaints
        client.write_all(b"pf12\r\n").await.unwrap();
        read_until(&mut client, PROMPT).await;
        client.write_all(b"+\r\n").await.unwrap();

        let response = task.await.unwrap().unwrap();
        assert_eq!(response.key, Key::Pf(8));
        assert!(response.value("input").is_none());
    }

    #[tokio::test]
    async fn test_line_end_split_across_screens() {
        let (mut client, mut server) = duplex(8192);
        let (screen, rules) = menu();
        let values = HashMap::new();

        let task = tokio::spawn(async move {
            let protocol = LineTelnet::new();
            let mut responses = Vec::new();
            for _ in 0..2 {
                let request = ScreenRequest {
                    screen: &screen,
                    rules: &rules,
                    values: &values,
                    accept_keys: &[Key::Enter],
                    cancel_keys: &[Key::Pf(8)],
                    error_field: "errormsg",
                    error_row: 2,
                    error_col: 33,
                };
                responses.push(protocol.render_and_await(request, &mut server).await);
            }
            (responses, server)
        });

        read_until(&mut client, PROMPT).await;
        client.write_all(b"+\r").await.unwrap();
        read_until(&mut client, PROMPT).await;
        client.write_all(b"\n").await.unwrap();
        client.write_all(b"2\r\n").await.unwrap();

        let (responses, server) = task.await.unwrap();
        assert_eq!(responses[0].as_ref().unwrap().key, Key::Pf(8));
        let second = responses[1].as_ref().unwrap();
        assert_eq!(second.key, Key::Enter);
        assert_eq!(second.value("input"), Some("2"));

        // No error screen was painted for a phantom empty line
        drop(server);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(!String::from_utf8_lossy(&rest).contains("Pick 1 or 2"));
    }

    #[tokio::test]
    async fn test_render_client_eof() {
        let (client, mut server) = duplex(8192);
        let (screen, rules) = menu();
        let values = HashMap::new();
        drop(client);

        let request = ScreenRequest {
            screen: &screen,
            rules: &rules,
            values: &values,
            accept_keys: &[Key::Enter],
            cancel_keys: &[Key::Pf(3)],
            error_field: "errormsg",
            error_row: 2,
            error_col: 33,
        };
        let result = LineTelnet::new()
            .render_and_await(request, &mut server)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unnegotiate_drains_until_timeout() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[IAC, DONT, SUPPRESS_GO_AHEAD]).await.unwrap();

        LineTelnet::new()
            .unnegotiate(&mut server, Duration::from_millis(50))
            .await
            .unwrap();

        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [IAC, WONT, SUPPRESS_GO_AHEAD, IAC, DONT, SUPPRESS_GO_AHEAD]);
    }

    #[tokio::test]
    async fn test_unnegotiate_client_gone() {
        let (client, mut server) = duplex(256);
        drop(client);
        let result = LineTelnet::new()
            .unnegotiate(&mut server, Duration::from_millis(50))
            .await;
        assert!(result.is_err());
    }
}
