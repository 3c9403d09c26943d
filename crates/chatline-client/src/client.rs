//! Client state machine.
//!
//! Mirrors the server's session from the other end of the socket: tracks
//! whether a login is outstanding, which name the server admitted, and turns
//! decoded server messages into [`ChatEvent`]s for the application.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ Connected ┌───────────┐  Login   ┌────────────────┐
//! │ Disconnected │──────────>│ Connected │─────────>│ AwaitingStatus │
//! └──────────────┘           └───────────┘<─────────└────────────────┘
//!                                  │       rejected         │ accepted
//!                                  │                        ↓
//!                                  │                  ┌──────────┐
//!                                  │                  │ LoggedIn │
//!                                  │                  └──────────┘
//!                                  │ Disconnect /           │ Disconnect /
//!                                  │ ConnectionLost         │ ConnectionLost
//!                                  ↓                        ↓
//!                              ┌──────────────────────────────┐
//!                              │            Closed            │
//!                              └──────────────────────────────┘
//! ```

use chatline_proto::{ChatMessage, Login, LoginStatus, Logout, Text};

use crate::{
    error::ClientError,
    event::{ChatEvent, ClientAction, ClientEvent},
};

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No socket yet
    Disconnected,
    /// Socket open, not logged in
    Connected,
    /// `Login` sent, waiting for `LoginStatus`
    AwaitingStatus,
    /// Server admitted the username
    LoggedIn,
    /// Socket closed; terminal
    Closed,
}

/// Sans-IO chat client.
///
/// Feed it [`ClientEvent`]s; execute the [`ClientAction`]s it returns in
/// order.
#[derive(Debug, Clone)]
pub struct Client {
    /// Current state
    state: ClientState,
    /// Name sent in the outstanding `Login`, or the admitted name once
    /// logged in
    username: Option<String>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client in [`ClientState::Disconnected`] state.
    pub fn new() -> Self {
        Self { state: ClientState::Disconnected, username: None }
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Admitted username. `None` until the server accepts a login.
    pub fn username(&self) -> Option<&str> {
        match self.state {
            ClientState::LoggedIn => self.username.as_deref(),
            _ => None,
        }
    }

    /// True once the server has accepted a login.
    pub fn is_logged_in(&self) -> bool {
        self.state == ClientState::LoggedIn
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connected => self.handle_connected(),
            ClientEvent::MessageReceived(message) => self.handle_message(message),
            ClientEvent::Login { username } => self.handle_login(username),
            ClientEvent::SendText { body } => self.handle_send_text(body),
            ClientEvent::Disconnect => Ok(self.handle_disconnect()),
            ClientEvent::ConnectionLost { reason } => Ok(self.handle_connection_lost(reason)),
        }
    }

    fn handle_connected(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        self.state = ClientState::Connected;
        Ok(vec![ClientAction::Emit(ChatEvent::Connected)])
    }

    fn handle_login(&mut self, username: String) -> Result<Vec<ClientAction>, ClientError> {
        match self.state {
            ClientState::Connected => {},
            ClientState::AwaitingStatus => return Err(ClientError::LoginPending),
            ClientState::LoggedIn => {
                return Err(ClientError::AlreadyLoggedIn {
                    username: self.username.clone().unwrap_or_default(),
                });
            },
            ClientState::Disconnected | ClientState::Closed => {
                return Err(ClientError::NotConnected);
            },
        }

        if username.is_empty() {
            return Err(ClientError::InvalidUsername);
        }

        self.state = ClientState::AwaitingStatus;
        self.username = Some(username.clone());
        Ok(vec![ClientAction::Send(ChatMessage::login(username))])
    }

    fn handle_send_text(&mut self, body: String) -> Result<Vec<ClientAction>, ClientError> {
        match (self.state, &self.username) {
            (ClientState::LoggedIn, Some(username)) => {
                Ok(vec![ClientAction::Send(ChatMessage::text(username.clone(), body))])
            },
            (ClientState::Disconnected | ClientState::Closed, _) => Err(ClientError::NotConnected),
            _ => Err(ClientError::NotLoggedIn),
        }
    }

    fn handle_disconnect(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        match self.state {
            ClientState::Closed => return actions,
            ClientState::LoggedIn => {
                if let Some(username) = self.username.clone() {
                    actions.push(ClientAction::Send(ChatMessage::logout(username)));
                }
            },
            ClientState::Disconnected | ClientState::Connected | ClientState::AwaitingStatus => {},
        }

        let reason = "disconnect requested".to_string();
        self.state = ClientState::Closed;
        actions.push(ClientAction::Close { reason: reason.clone() });
        actions.push(ClientAction::Emit(ChatEvent::Disconnected { reason }));
        actions
    }

    fn handle_connection_lost(&mut self, reason: String) -> Vec<ClientAction> {
        if self.state == ClientState::Closed {
            return vec![];
        }

        self.state = ClientState::Closed;
        vec![ClientAction::Emit(ChatEvent::Disconnected { reason })]
    }

    fn handle_message(&mut self, message: ChatMessage) -> Result<Vec<ClientAction>, ClientError> {
        let event = match (self.state, message) {
            (ClientState::AwaitingStatus, ChatMessage::LoginStatus(status)) => {
                self.handle_login_status(status)
            },
            (ClientState::LoggedIn, ChatMessage::Login(Login { username })) => {
                ChatEvent::UserJoined { username }
            },
            (ClientState::LoggedIn, ChatMessage::Logout(Logout { username })) => {
                ChatEvent::UserLeft { username }
            },
            (ClientState::LoggedIn, ChatMessage::Text(Text { username, body })) => {
                ChatEvent::TextReceived { username, body }
            },
            (state, message) => {
                return Err(ClientError::UnexpectedMessage {
                    state,
                    message: message.message_type().name(),
                });
            },
        };

        Ok(vec![ClientAction::Emit(event)])
    }

    fn handle_login_status(&mut self, status: LoginStatus) -> ChatEvent {
        if status.accepted {
            self.state = ClientState::LoggedIn;
            ChatEvent::LoginAccepted
        } else {
            // Back to connected so the user can pick another name
            self.state = ClientState::Connected;
            self.username = None;
            ChatEvent::LoginRejected { reason: status.error_text }
        }
    }
}
