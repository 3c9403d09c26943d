//! Error types for the chatline session layer.
//!
//! The variants follow the failure classes a chat connection can hit:
//! framing errors and protocol violations from a broken or hostile peer,
//! username conflicts during login, socket failures, and login timeouts.
//! Only [`SessionError::AuthConflict`] leaves the connection usable.

use std::{io, time::Duration};

use chatline_proto::{ProtocolError, USERNAME_TAKEN};
use thiserror::Error;

use crate::session::SessionState;

/// Errors that can occur while driving a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad type tag, over-length frame, or undecodable payload
    #[error("framing error: {0}")]
    Framing(#[from] ProtocolError),

    /// Message is not allowed in the session's current state
    #[error("protocol violation: {message} not allowed in state {state:?}")]
    ProtocolViolation {
        /// State when the message arrived
        state: SessionState,
        /// Name of the offending message type
        message: &'static str,
    },

    /// Requested username is already registered
    #[error("{}", USERNAME_TAKEN)]
    AuthConflict {
        /// Username that was refused
        username: String,
    },

    /// Socket-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer never completed login
    #[error("login timeout after {elapsed:?}")]
    LoginTimeout {
        /// How long the session waited
        elapsed: Duration,
    },

    /// Operation not valid for the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

impl SessionError {
    /// Returns true if the connection must be closed.
    ///
    /// A username conflict is answered with a rejection and the peer may retry
    /// on the same connection. Everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AuthConflict { .. })
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
