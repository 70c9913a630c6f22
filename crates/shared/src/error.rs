//! Shared error types for framing, the chat payload and session operations.
//!
//! Every failure a caller can observe is one of these. None of them is fatal:
//! after any of them the session can be driven back through `connect`.

use thiserror::Error;

/// A STOMP frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown STOMP command `{0}`")]
    UnknownCommand(String),
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header `{0}`")]
    InvalidEscape(String),
    #[error("invalid content-length `{0}`")]
    InvalidContentLength(String),
    #[error("frame exceeds the size limit ({0} bytes pending)")]
    TooLarge(usize),
    #[error("frame body is not terminated by NUL")]
    MissingTerminator,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// A SockJS transport frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SockJsError {
    #[error("empty SockJS frame")]
    Empty,
    #[error("unknown SockJS frame type `{0}`")]
    UnknownType(char),
    #[error("malformed SockJS payload: {0}")]
    Payload(String),
}

/// The connect handshake did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("a bearer token is required to connect")]
    MissingToken,
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("broker rejected the connection: {0}")]
    Rejected(String),
    #[error("connection closed before the handshake completed: {0}")]
    Closed(String),
}

/// An operation that needs an established connection was attempted without one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session is not connected (state: {state})")]
pub struct NotConnectedError {
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),
    #[error("room id must not be blank")]
    BlankRoom,
    #[error("link refused the frame: {0}")]
    LinkClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("not subscribed to room `{room}`")]
    NotSubscribed { room: String },
    #[error("could not encode message: {0}")]
    Encode(String),
    #[error("link refused the frame: {0}")]
    LinkClosed(String),
}

/// An inbound frame could not be turned into a chat message. These are logged
/// and dropped, never surfaced to the caller of a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed chat payload: {0}")]
    Body(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Body(e.to_string())
    }
}
