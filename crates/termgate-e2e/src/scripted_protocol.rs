//! Screen protocol double that replays canned responses
//!
//! Lets tests drive the session orchestrator over a real socket without
//! speaking telnet, and inspect every screen it was asked to show.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use termgate_protocol::{Connection, Key, ProtocolError, Response, ScreenProtocol, ScreenRequest};
use termgate_protocol::{Screen, SCREEN_ROWS};

/// Scripted implementation of [`ScreenProtocol`]
#[derive(Default)]
pub struct ScriptedProtocol {
    responses: Mutex<VecDeque<Response>>,
    screens: Mutex<Vec<Screen>>,
    fail_negotiate: bool,
    fail_unnegotiate: bool,
    unnegotiated: Mutex<bool>,
}

impl ScriptedProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key press with no field values
    pub fn press(self, key: Key) -> Self {
        self.push(key, None)
    }

    /// Queue Enter with `input` typed into the selection field
    pub fn enter(self, input: &str) -> Self {
        self.push(Key::Enter, Some(input))
    }

    pub fn failing_negotiate(mut self) -> Self {
        self.fail_negotiate = true;
        self
    }

    pub fn failing_unnegotiate(mut self) -> Self {
        self.fail_unnegotiate = true;
        self
    }

    fn push(self, key: Key, input: Option<&str>) -> Self {
        let mut values = HashMap::new();
        if let Some(input) = input {
            values.insert(termgate_server::INPUT_FIELD.to_string(), input.to_string());
        }
        self.responses.lock().push_back(Response { key, values });
        self
    }

    /// Every screen shown so far
    pub fn screens(&self) -> Vec<Screen> {
        self.screens.lock().clone()
    }

    /// Text rows of the `index`th screen shown
    pub fn screen_text(&self, index: usize) -> Vec<String> {
        self.screens
            .lock()
            .get(index)
            .map(|screen| screen.render_text(&HashMap::new()))
            .unwrap_or_else(|| vec![String::new(); SCREEN_ROWS])
    }

    pub fn was_unnegotiated(&self) -> bool {
        *self.unnegotiated.lock()
    }
}

#[async_trait]
impl ScreenProtocol for ScriptedProtocol {
    async fn negotiate(&self, _conn: &mut dyn Connection) -> Result<(), ProtocolError> {
        if self.fail_negotiate {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(())
    }

    async fn render_and_await(
        &self,
        request: ScreenRequest<'_>,
        _conn: &mut dyn Connection,
    ) -> Result<Response, ProtocolError> {
        self.screens.lock().push(request.screen.clone());
        let next = self.responses.lock().pop_front();
        next.ok_or(ProtocolError::ConnectionClosed)
    }

    async fn unnegotiate(
        &self,
        _conn: &mut dyn Connection,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        if self.fail_unnegotiate {
            return Err(ProtocolError::Timeout(timeout));
        }
        *self.unnegotiated.lock() = true;
        Ok(())
    }
}
