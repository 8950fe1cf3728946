//! Screen protocol used by the termgate menu
//!
//! The gateway core only talks to clients through [`ScreenProtocol`]. This crate
//! holds the declarative screen types that cross that seam, plus [`LineTelnet`],
//! a line-mode telnet implementation usable from any telnet client.

mod codec;
mod protocol;
mod screen;
mod telnet;

pub use codec::{CodecError, TelnetLineCodec};
pub use protocol::{Connection, ProtocolError, ScreenProtocol};
pub use screen::{
    Color, Field, FieldRules, Key, Response, Rules, Screen, ScreenRequest, Validator, SCREEN_COLS,
    SCREEN_ROWS,
};
pub use telnet::LineTelnet;
