//! termgate server library
//!
//! Presents a menu of configured backend hosts to each terminal client and,
//! once a host is picked, relays the raw byte stream between the two.
//! The pieces are exposed for embedding and for end-to-end tests.

mod config;
mod dialer;
mod gateway;
mod logging;
mod menu;
mod relay;
mod session;

pub use config::{
    wrap, AppConfig, ConfigError, ConfigFile, ServerEntry, ServerTarget, DEFAULT_TITLE,
    MAX_DISCLAIMER_WIDTH, MAX_NAME_LENGTH, MAX_SERVERS, MAX_TITLE_LENGTH,
};
pub use dialer::{Backend, DialError, Dialer, CONNECT_TIMEOUT};
pub use gateway::Gateway;
pub use logging::{init_logging, log_level};
pub use menu::{
    build_screen, total_pages, KeyMap, MenuEvent, MenuState, UserSession, ERROR_FIELD, INPUT_FIELD,
    PAGE_SIZE,
};
pub use relay::{Direction, Relay, RelayError, READ_POLL_INTERVAL, RELAY_BUFFER_SIZE};
pub use session::{SessionError, SessionOrchestrator};
