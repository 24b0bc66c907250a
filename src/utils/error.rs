//! The `error` module defines the error types used across `ssehub`.
//!
//! Hub errors stop at registration or publish and never reach connected
//! subscribers. Client errors drive the reconnection engine; only the terminal
//! ones are ever handed to a consumer.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the broadcast hub.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// `connect` was called but the hub has no channel resolver.
    #[error("no channel resolver configured")]
    NoResolver,

    /// The resolver refused the connection.
    #[error("connection rejected: {0}")]
    Unauthorized(#[from] ResolveError),

    /// Registration resolved to an empty channel set.
    #[error("connection {0} resolved to no channels")]
    NoChannels(String),

    /// A live subscriber already uses this connection id.
    #[error("connection {0} is already registered")]
    DuplicateConnection(String),

    /// The configured subscriber ceiling was reached.
    #[error("subscriber limit of {0} reached")]
    TooManySubscribers(usize),

    /// The type tag would break wire framing.
    #[error("event type {0:?} contains a line break")]
    InvalidEventType(String),
}

/// Rejection produced by a channel resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("{0}")]
    Denied(String),

    #[error("missing parameter `{0}`")]
    MissingParameter(String),
}

/// Errors produced while decoding an event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("field `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// Errors seen by the client reconnection engine.
///
/// Everything except [`ClientError::Closed`] and
/// [`ClientError::RetriesExhausted`] is transient and only feeds the backoff
/// loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("session closed")]
    Closed,

    #[error("no Tokio runtime available to drive the session")]
    NoRuntime,

    #[error("http error: {0}")]
    Http(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("unexpected content type {0:?}")]
    ContentType(String),

    #[error("malformed event stream: {0}")]
    Parse(#[from] ParseError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("stream ended")]
    StreamEnded,

    #[error("gave up after {attempts} reconnect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ClientError {
    /// Returns true for errors that end the session instead of triggering a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::RetriesExhausted { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
