//! Server error types.

use std::fmt;

use chatline_core::SessionError;

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, zero-sized queue, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, socket I/O error, etc.).
    ///
    /// May be transient (connection reset) or fatal (bind address in use).
    /// Check error message for details.
    Transport(String),

    /// Internal error (task panicked, unexpected state, etc.).
    ///
    /// Should never happen in correct implementation. Indicates a bug.
    Internal(String),

    /// Session error (from the `Session` state machine).
    ///
    /// Wraps errors from the core session logic. See `SessionError` for
    /// details.
    Session(SessionError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Session(err) => write!(f, "session error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
