//! WebSocket wire contract spoken by getuid clients.
//!
//! A client connects to [`ENDPOINT_PATH`], optionally offering the
//! [`SUBPROTOCOL`] sub-protocol, and sends the text message [`VERSION`]
//! each time it wants a token. Every accepted message is answered with one
//! text frame holding a token, or the connection is closed with one of the
//! [`CloseStatus`] codes.

use std::fmt;

/// Default HTTP path of the WebSocket endpoint.
pub const ENDPOINT_PATH: &str = "/getuid";

/// The only WebSocket sub-protocol defined.
pub const SUBPROTOCOL: &str = "getuid";

/// The only accepted client message.
pub const VERSION: &str = "version 1.0";

/// Close reason when a write to the token source fails.
pub const REASON_WRITE_FAILED: &str = "write failed";

/// Close reason when a read from the token source fails.
pub const REASON_READ_FAILED: &str = "read failed";

/// Abnormal close statuses sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// 1003: the client sent something other than the version literal.
    UnsupportedData,
    /// 1011: the round trip to the token source failed.
    InternalError,
}

impl CloseStatus {
    /// RFC 6455 status code.
    pub const fn code(self) -> u16 {
        match self {
            Self::UnsupportedData => 1003,
            Self::InternalError => 1011,
        }
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedData => write!(f, "unsupported data ({})", self.code()),
            Self::InternalError => write!(f, "internal error ({})", self.code()),
        }
    }
}

/// A client message that must close the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("only plaintext allowed")]
    BinaryFrame,

    #[error("only {} is supported", VERSION)]
    UnsupportedVersion,
}

impl ProtocolViolation {
    /// Status used when closing the connection for this violation.
    pub const fn close_status(&self) -> CloseStatus {
        CloseStatus::UnsupportedData
    }

    /// Human-readable close reason.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Kind of a data frame received from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Text(&'a str),
    Binary,
}

/// Decide whether a client data frame is a valid token request.
pub fn check_request(frame: Frame<'_>) -> Result<(), ProtocolViolation> {
    match frame {
        Frame::Binary => Err(ProtocolViolation::BinaryFrame),
        Frame::Text(text) if text == VERSION => Ok(()),
        Frame::Text(_) => Err(ProtocolViolation::UnsupportedVersion),
    }
}

/// Strip the line terminator from one line of token source output.
///
/// Removes a trailing `\n` and then an optional `\r`. Nothing else is
/// touched, so an empty line yields an empty token.
pub fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
