use wamp_proto::{Dict, List, ProtocolError};

/// Errors surfaced to users of a [`crate::Session`].
#[derive(Debug, thiserror::Error)]
pub enum WampError {
    /// Link-level failure, not protocol-aware.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-state message. Always fatal to the session.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The router aborted the handshake.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String, details: Dict },

    /// A router-delivered ERROR for a specific request, carried verbatim.
    #[error("application error: {error}")]
    Application {
        error: String,
        args: List,
        kwargs: Dict,
    },

    /// The operation was attempted or still pending when the session
    /// left the established state.
    #[error("session closed")]
    SessionClosed,

    /// A caller-supplied timeout elapsed before the response arrived.
    #[error("operation timed out")]
    Timeout,

    /// Session settings could not be loaded or parsed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl From<ProtocolError> for WampError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => WampError::Transport(e.to_string()),
            other => WampError::ProtocolViolation(other.to_string()),
        }
    }
}

impl WampError {
    /// True for the error classes that tear down the whole session
    /// rather than failing a single operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WampError::Transport(_) | WampError::ProtocolViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WampError>;
