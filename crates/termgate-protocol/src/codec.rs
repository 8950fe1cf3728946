use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Longest input line accepted from a client
const MAX_LINE_LENGTH: usize = 255;

pub(crate) const IAC: u8 = 255;
pub(crate) const DONT: u8 = 254;
pub(crate) const DO: u8 = 253;
pub(crate) const WONT: u8 = 252;
pub(crate) const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

pub(crate) const ECHO: u8 = 1;
pub(crate) const SUPPRESS_GO_AHEAD: u8 = 3;

/// Errors that can occur during encoding/decoding
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Line too long (max {MAX_LINE_LENGTH} bytes)")]
    LineTooLong,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Option,
    Subneg,
    SubnegIac,
}

/// Line codec for telnet clients in line mode
///
/// Decoding strips telnet command sequences and yields one `String` per input
/// line (CR, LF, CR LF and CR NUL all end a line). Backspace and DEL edit the
/// pending line. Encoding turns LF into CR LF; UTF-8 text never contains an
/// IAC byte, so no escaping is needed on output.
#[derive(Debug)]
pub struct TelnetLineCodec {
    state: State,
    line: Vec<u8>,
    after_cr: bool,
}

impl TelnetLineCodec {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            line: Vec::new(),
            after_cr: false,
        }
    }

    /// A codec for a connection that has already sent lines
    ///
    /// A leading LF or NUL is taken as the tail of a CR sent before this codec
    /// existed, not as an empty line.
    pub fn continuing() -> Self {
        Self {
            after_cr: true,
            ..Self::new()
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        line
    }

    fn push(&mut self, byte: u8) -> Result<(), CodecError> {
        if self.line.len() >= MAX_LINE_LENGTH {
            return Err(CodecError::LineTooLong);
        }
        self.line.push(byte);
        Ok(())
    }
}

impl Default for TelnetLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TelnetLineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while src.has_remaining() {
            let byte = src.get_u8();
            match self.state {
                State::Data => {
                    if std::mem::take(&mut self.after_cr) && (byte == b'\n' || byte == 0) {
                        continue;
                    }
                    match byte {
                        IAC => self.state = State::Iac,
                        b'\r' => {
                            self.after_cr = true;
                            return Ok(Some(self.take_line()));
                        }
                        b'\n' => return Ok(Some(self.take_line())),
                        0x08 | 0x7f => {
                            self.line.pop();
                        }
                        b if b < 0x20 => {}
                        b => self.push(b)?,
                    }
                }
                State::Iac => {
                    self.state = match byte {
                        WILL | WONT | DO | DONT => State::Option,
                        SB => State::Subneg,
                        IAC => {
                            self.push(IAC)?;
                            State::Data
                        }
                        _ => State::Data,
                    };
                }
                State::Option => self.state = State::Data,
                State::Subneg => {
                    if byte == IAC {
                        self.state = State::SubnegIac;
                    }
                }
                State::SubnegIac => {
                    self.state = if byte == SE {
                        State::Data
                    } else {
                        State::Subneg
                    };
                }
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if self.line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.take_line()))
        }
    }
}

impl<'a> Encoder<&'a str> for TelnetLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + item.len() / 16);
        for &byte in item.as_bytes() {
            if byte == b'\n' {
                dst.put_slice(b"\r\n");
            } else {
                dst.put_u8(byte);
            }
        }
        Ok(())
    }
}
