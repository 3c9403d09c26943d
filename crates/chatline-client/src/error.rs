//! Client error types.

use thiserror::Error;

use crate::client::ClientState;

/// Errors from the client state machine.
///
/// All of these are local refusals: the offending command or message is not
/// acted on and nothing is written to the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No connection to the server.
    #[error("not connected")]
    NotConnected,

    /// Connection already established (or already torn down).
    #[error("already connected")]
    AlreadyConnected,

    /// `send_text` before the server accepted a login.
    #[error("not logged in")]
    NotLoggedIn,

    /// A login is already waiting for the server's verdict.
    #[error("login already in progress")]
    LoginPending,

    /// Already logged in on this connection.
    #[error("already logged in as {username}")]
    AlreadyLoggedIn {
        /// Current username.
        username: String,
    },

    /// Usernames must be non-empty.
    #[error("username must not be empty")]
    InvalidUsername,

    /// The server sent a message that makes no sense in the current state.
    #[error("unexpected {message} from server in state {state:?}")]
    UnexpectedMessage {
        /// Client state when it arrived.
        state: ClientState,
        /// Name of the message type.
        message: &'static str,
    },
}
