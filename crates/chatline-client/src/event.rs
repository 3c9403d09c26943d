//! Client events and actions.

use chatline_proto::ChatMessage;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting socket lifecycle (connected, lost)
/// - Receiving and decoding frames from the network
/// - Forwarding application intents (log in, send text, disconnect)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// TCP connection to the server is established.
    Connected,

    /// Message decoded from the server's stream.
    MessageReceived(ChatMessage),

    /// Application wants to log in.
    Login {
        /// Requested username.
        username: String,
    },

    /// Application wants to send a chat line.
    SendText {
        /// Message body.
        body: String,
    },

    /// Application wants to leave.
    Disconnect,

    /// Socket closed or failed underneath the client.
    ConnectionLost {
        /// What went wrong.
        reason: String,
    },
}

/// Notifications for the application layer.
///
/// This is the whole surface a user interface needs: it never sees frames
/// or protocol state directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Connected to the server; a login may now be attempted.
    Connected,

    /// The server admitted the requested username.
    LoginAccepted,

    /// The server refused the requested username. The connection stays
    /// open; prompt for another name and retry.
    LoginRejected {
        /// Server-supplied reason (e.g., "username taken").
        reason: String,
    },

    /// Someone else said something.
    TextReceived {
        /// Author.
        username: String,
        /// Message body.
        body: String,
    },

    /// Another user logged in.
    UserJoined {
        /// Who joined.
        username: String,
    },

    /// Another user left.
    UserLeft {
        /// Who left.
        username: String,
    },

    /// Connection closed, by either side.
    Disconnected {
        /// Why the connection ended.
        reason: String,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Encode and write a message to the server.
    Send(ChatMessage),

    /// Deliver a notification to the application layer.
    Emit(ChatEvent),

    /// Shut the socket down.
    Close {
        /// Reason for closing.
        reason: String,
    },
}
