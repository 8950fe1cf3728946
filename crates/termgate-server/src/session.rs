//! Per-connection control flow: menu, dial, relay

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

use termgate_protocol::{Connection, ProtocolError, ScreenProtocol, ScreenRequest};

use crate::config::{AppConfig, ServerTarget};
use crate::dialer::{Backend, DialError, Dialer};
use crate::menu::{self, build_screen, KeyMap, MenuState, UserSession, ERROR_FIELD};
use crate::relay::Relay;

/// Default bound on taking a client out of screen mode
const DEFAULT_UNNEGOTIATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on closing the client after a session that never reached the relay
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Failures that end a session before or while reaching the backend
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Protocol negotiation failed: {0}")]
    Negotiate(#[source] ProtocolError),

    #[error("Menu screen failed: {0}")]
    Screen(#[source] ProtocolError),

    #[error("Protocol unnegotiation failed: {0}")]
    Unnegotiate(#[source] ProtocolError),

    #[error("{0}")]
    Dial(#[source] DialError),

    #[error("Connecting to {addr} timed out after {after:?}")]
    DialTimeout { addr: String, after: Duration },

    #[error("{0}")]
    Tls(#[source] DialError),

    #[error("Selection {0} does not name a configured server")]
    InvalidSelection(usize),
}

impl SessionError {
    /// Session step that produced the error
    pub fn step(&self) -> &'static str {
        match self {
            SessionError::Negotiate(_) => "negotiate",
            SessionError::Screen(_) => "menu",
            SessionError::InvalidSelection(_) => "select",
            SessionError::Unnegotiate(_) => "unnegotiate",
            SessionError::Dial(_) | SessionError::DialTimeout { .. } => "dial",
            SessionError::Tls(_) => "tls",
        }
    }
}

impl From<DialError> for SessionError {
    fn from(e: DialError) -> Self {
        match e {
            DialError::Timeout { addr, after } => SessionError::DialTimeout { addr, after },
            DialError::Tls(_) | DialError::Handshake { .. } | DialError::HandshakeTimeout { .. } => {
                SessionError::Tls(e)
            }
            DialError::Connect { .. } => SessionError::Dial(e),
        }
    }
}

/// Drives one client from negotiation through the relay
///
/// Shared by every session; holds only read-only state.
pub struct SessionOrchestrator {
    config: Arc<AppConfig>,
    protocol: Arc<dyn ScreenProtocol>,
    dialer: Dialer,
    relay: Relay,
    keys: KeyMap,
    unnegotiate_timeout: Duration,
}

impl SessionOrchestrator {
    pub fn new(config: Arc<AppConfig>, protocol: Arc<dyn ScreenProtocol>, dialer: Dialer) -> Self {
        Self {
            config,
            protocol,
            dialer,
            relay: Relay::default(),
            keys: KeyMap::default(),
            unnegotiate_timeout: DEFAULT_UNNEGOTIATE_TIMEOUT,
        }
    }

    pub fn with_relay(mut self, relay: Relay) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_key_map(mut self, keys: KeyMap) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_unnegotiate_timeout(mut self, timeout: Duration) -> Self {
        self.unnegotiate_timeout = timeout;
        self
    }

    /// Run a session to completion
    ///
    /// The client is closed on every path. Relay errors are logged, not returned.
    pub async fn run<C>(&self, mut client: C) -> Result<(), SessionError>
    where
        C: Connection + 'static,
    {
        let (target, backend) = match self.connect(&mut client).await {
            Ok(Some(connected)) => connected,
            Ok(None) => {
                tracing::info!("Client exited the menu");
                close(&mut client).await;
                return Ok(());
            }
            Err(e) => {
                close(&mut client).await;
                return Err(e);
            }
        };

        tracing::info!(
            server = %target.name,
            tls = backend.is_tls(),
            "Relaying to {}",
            target.address()
        );
        match self.relay.run(client, backend).await {
            Ok(()) => tracing::info!("Session ended"),
            Err(e) => tracing::info!("Session ended: {}", e),
        }
        Ok(())
    }

    /// Everything up to the relay: returns `None` when the client cancels
    async fn connect<C>(
        &self,
        client: &mut C,
    ) -> Result<Option<(&ServerTarget, Backend)>, SessionError>
    where
        C: Connection,
    {
        self.protocol
            .negotiate(&mut *client)
            .await
            .map_err(SessionError::Negotiate)?;

        let Some(index) = self.select(client).await? else {
            return Ok(None);
        };
        let target = self
            .config
            .servers
            .get(index)
            .ok_or(SessionError::InvalidSelection(index))?;
        tracing::debug!(server = %target.name, "Client selected server {}", index + 1);

        self.protocol
            .unnegotiate(&mut *client, self.unnegotiate_timeout)
            .await
            .map_err(SessionError::Unnegotiate)?;

        tracing::info!(server = %target.name, "Connecting to {}", target.address());
        let backend = self.dialer.connect(target).await?;
        Ok(Some((target, backend)))
    }

    /// Menu loop; yields the zero-based index of the chosen target
    async fn select<C>(&self, client: &mut C) -> Result<Option<usize>, SessionError>
    where
        C: Connection,
    {
        let mut session = UserSession::new(self.config.servers.len());
        let accept_keys = self.keys.accept_keys();
        let cancel_keys = self.keys.unvalidated_keys();
        let values = HashMap::new();
        let (cursor_row, cursor_col) = menu::cursor_position();

        loop {
            let (screen, rules) = build_screen(&self.config, &session);
            let request = ScreenRequest {
                screen: &screen,
                rules: &rules,
                values: &values,
                accept_keys: &accept_keys,
                cancel_keys: &cancel_keys,
                error_field: ERROR_FIELD,
                error_row: cursor_row,
                error_col: cursor_col,
            };

            let response = self
                .protocol
                .render_and_await(request, &mut *client)
                .await
                .map_err(SessionError::Screen)?;

            let Some(event) = self.keys.classify(&response) else {
                tracing::trace!(key = ?response.key, "Ignoring unmapped key");
                continue;
            };

            match session.apply(event) {
                MenuState::Listing(page) => {
                    tracing::trace!(page, error = ?session.pending_error(), "Showing menu page")
                }
                MenuState::Submitted(index) => return Ok(Some(index)),
                MenuState::Cancelled => return Ok(None),
            }
        }
    }
}

async fn close<C: Connection>(client: &mut C) {
    if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, client.shutdown()).await {
        tracing::debug!("Failed to close client: {}", e);
    }
}
