//! Server-side session state machine.
//!
//! One `Session` per accepted connection. Uses the action pattern: methods
//! take decoded messages (and time) as input and return [`SessionAction`]s for
//! the runtime to execute. The machine never touches a socket or the registry
//! itself, which keeps it deterministic and trivially testable.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐  accept  ┌───────────────┐  Login{u}, u free  ┌───────────────┐
//! │ Connecting │─────────>│ AwaitingLogin │───────────────────>│ Authenticated │
//! └────────────┘          └───────────────┘                    └───────────────┘
//!                           │   ↑      │                               │
//!                           │   └──────┘ Login{u}, u taken             │
//!                           │            (reply rejection)             │
//!                           │ violation / framing error /              │ Logout / EOF /
//!                           │ timeout / EOF                            │ error
//!                           ↓                                          ↓
//!                      ┌─────────┐           finish_close         ┌─────────┐
//!                      │ Closing │───────────────────────────────>│ Closed  │
//!                      └─────────┘                                └─────────┘
//! ```

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use chatline_proto::{ChatMessage, FrameCodec, Login, Text};

use crate::error::SessionError;

/// Opaque connection handle assigned by the server runtime.
pub type SessionId = u64;

/// Time allowed between accept and a successful login.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Actions returned by the session state machine.
///
/// The runtime executes these in order:
/// - `Send`: Enqueue the message on this session's own outbound queue
/// - `Register`: Try to claim the username in the registry, then report the
///   result through [`Session::login_outcome`]
/// - `Broadcast`: Fan the message out to every other registered session
/// - `Deregister`: Release the username (broadcasts the `Logout`)
/// - `Close`: Stop reading and shut the connection down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this message to the session's own peer
    Send(ChatMessage),

    /// Claim a username in the registry
    Register {
        /// Requested username
        username: String,
    },

    /// Deliver to every other authenticated session
    Broadcast(ChatMessage),

    /// Release a username from the registry
    Deregister {
        /// Username to release
        username: String,
    },

    /// Close the connection with this reason
    Close {
        /// Reason for closing the connection
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket exists but has not been handed to the session loop yet
    Connecting,
    /// Waiting for a `Login` that claims a free username
    AwaitingLogin,
    /// Username registered; may send `Text` and `Logout`
    Authenticated,
    /// Shutting down; registry entry released
    Closing,
    /// Fully closed
    Closed,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a connection may stay unauthenticated
    pub login_timeout: Duration,
    /// Frame size limit, for inbound frames and for every frame the session
    /// asks to broadcast
    pub codec: FrameCodec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { login_timeout: DEFAULT_LOGIN_TIMEOUT, codec: FrameCodec::default() }
    }
}

/// Session state machine
///
/// Owns the per-connection authentication state. Inbound messages must be fed
/// strictly in arrival order; the machine has no internal queue and never
/// reorders.
///
/// Generic over `Instant` so tests can drive time explicitly.
#[derive(Debug, Clone)]
pub struct Session<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Connection handle
    id: SessionId,
    /// Current state
    state: SessionState,
    /// Configuration
    config: SessionConfig,
    /// When the connection was accepted
    connected_at: I,
    /// Username once authenticated
    username: Option<String>,
    /// Username awaiting a registry verdict
    pending_login: Option<String>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new session in [`SessionState::Connecting`] state
    pub fn new(id: SessionId, now: I, config: SessionConfig) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            config,
            connected_at: now,
            username: None,
            pending_login: None,
        }
    }

    /// Connection handle.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated username. `None` before login succeeds.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Socket handed over to the session loop.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not in Connecting state
    pub fn accept(&mut self, now: I) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState { state: self.state, operation: "accept" });
        }

        self.state = SessionState::AwaitingLogin;
        self.connected_at = now;
        Ok(())
    }

    /// Process one decoded inbound message.
    ///
    /// # Errors
    ///
    /// - `SessionError::ProtocolViolation` if the message is not allowed in
    ///   the current state. The caller should close the session.
    /// - `SessionError::Framing` if a rewritten `Text` no longer fits in one
    ///   frame. The caller should close the session.
    /// - `SessionError::InvalidState` if the session is already closing
    pub fn handle_message(
        &mut self,
        message: ChatMessage,
    ) -> Result<Vec<SessionAction>, SessionError> {
        match (self.state, message) {
            (SessionState::AwaitingLogin, ChatMessage::Login(Login { username }))
                if self.pending_login.is_none() =>
            {
                self.pending_login = Some(username.clone());
                Ok(vec![SessionAction::Register { username }])
            },

            (SessionState::Authenticated, ChatMessage::Text(Text { body, .. })) => {
                // Fan-out always carries the registered name, never the claimed one
                let username = self.authenticated_username("broadcast text")?;
                let text = ChatMessage::text(username, body);

                // A long registered name can push a text that arrived under
                // the cap over it, and every peer would reject the frame
                self.config.codec.check_size(&text)?;
                Ok(vec![SessionAction::Broadcast(text)])
            },

            (SessionState::Authenticated, ChatMessage::Logout(_)) => Ok(self.close("logout")),

            (state @ (SessionState::Closing | SessionState::Closed), _) => {
                Err(SessionError::InvalidState { state, operation: "handle message" })
            },

            (state, message) => Err(SessionError::ProtocolViolation {
                state,
                message: message.message_type().name(),
            }),
        }
    }

    /// Report the registry's verdict for the pending login.
    ///
    /// On acceptance the registry has already queued the `LoginStatus` for
    /// this session and announced the join, so no action is returned. On
    /// rejection the session stays in `AwaitingLogin` and replies with the
    /// conflict so the peer can retry.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if no login is pending
    pub fn login_outcome(&mut self, accepted: bool) -> Result<Vec<SessionAction>, SessionError> {
        let Some(username) = self.pending_login.take() else {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "complete login",
            });
        };

        if accepted {
            self.state = SessionState::Authenticated;
            self.username = Some(username);
            return Ok(vec![]);
        }

        let conflict = SessionError::AuthConflict { username };
        Ok(vec![SessionAction::Send(ChatMessage::rejected(conflict.to_string()))])
    }

    /// Begin shutdown.
    ///
    /// Returns `Deregister` if the session held a username, then `Close`.
    /// Idempotent: a session already closing returns no actions, so the
    /// departure is announced exactly once.
    pub fn close(&mut self, reason: impl Into<String>) -> Vec<SessionAction> {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return vec![];
        }

        self.state = SessionState::Closing;
        self.pending_login = None;

        let mut actions = Vec::with_capacity(2);
        if let Some(username) = self.username.clone() {
            actions.push(SessionAction::Deregister { username });
        }
        actions.push(SessionAction::Close { reason: reason.into() });
        actions
    }

    /// Mark the connection as fully torn down.
    pub fn finish_close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Elapsed time since accept, if the login deadline passed. `None`
    /// otherwise.
    #[must_use]
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        if self.state != SessionState::AwaitingLogin {
            return None;
        }

        let elapsed = now - self.connected_at;
        if elapsed > self.config.login_timeout { Some(elapsed) } else { None }
    }

    /// Process periodic maintenance.
    ///
    /// Call this periodically to enforce the login deadline.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        match self.check_timeout(now) {
            Some(elapsed) => self.close(SessionError::LoginTimeout { elapsed }.to_string()),
            None => vec![],
        }
    }

    fn authenticated_username(&self, operation: &'static str) -> Result<String, SessionError> {
        self.username
            .clone()
            .ok_or(SessionError::InvalidState { state: self.state, operation })
    }
}

#[cfg(test)]
mod tests {
    use chatline_proto::ProtocolError;

    use super::*;

    fn authenticated(username: &str) -> Session {
        let t0 = Instant::now();
        let mut session = Session::new(7, t0, SessionConfig::default());
        session.accept(t0).unwrap();
        session.handle_message(ChatMessage::login(username)).unwrap();
        session.login_outcome(true).unwrap();
        session
    }

    #[test]
    fn session_lifecycle() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        assert_eq!(session.state(), SessionState::Connecting);

        session.accept(t0).unwrap();
        assert_eq!(session.state(), SessionState::AwaitingLogin);

        let actions = session.handle_message(ChatMessage::login("alice")).unwrap();
        assert_eq!(actions, vec![SessionAction::Register { username: "alice".to_string() }]);
        assert_eq!(session.username(), None);

        let actions = session.login_outcome(true).unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.username(), Some("alice"));

        let actions = session.close("peer closed");
        assert_eq!(actions, vec![
            SessionAction::Deregister { username: "alice".to_string() },
            SessionAction::Close { reason: "peer closed".to_string() },
        ]);
        assert_eq!(session.state(), SessionState::Closing);

        session.finish_close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn rejected_login_allows_retry() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();

        session.handle_message(ChatMessage::login("bob")).unwrap();
        let actions = session.login_outcome(false).unwrap();

        assert_eq!(actions, vec![SessionAction::Send(ChatMessage::rejected("username taken"))]);
        assert_eq!(session.state(), SessionState::AwaitingLogin);

        // Second attempt with a different name goes through
        let actions = session.handle_message(ChatMessage::login("bobby")).unwrap();
        assert_eq!(actions, vec![SessionAction::Register { username: "bobby".to_string() }]);
        session.login_outcome(true).unwrap();
        assert_eq!(session.username(), Some("bobby"));
    }

    #[test]
    fn text_before_login_is_violation() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();

        let result = session.handle_message(ChatMessage::text("mallory", "hi"));
        assert_eq!(
            result,
            Err(SessionError::ProtocolViolation {
                state: SessionState::AwaitingLogin,
                message: "Text",
            })
        );
    }

    #[test]
    fn login_while_authenticated_is_violation() {
        let mut session = authenticated("alice");
        let result = session.handle_message(ChatMessage::login("alice2"));
        assert!(matches!(result, Err(SessionError::ProtocolViolation { .. })));
    }

    #[test]
    fn login_status_from_client_is_violation() {
        let mut session = authenticated("alice");
        let result = session.handle_message(ChatMessage::accepted());
        assert!(matches!(
            result,
            Err(SessionError::ProtocolViolation { message: "LoginStatus", .. })
        ));
    }

    #[test]
    fn text_is_broadcast_under_registered_name() {
        let mut session = authenticated("alice");

        let actions = session.handle_message(ChatMessage::text("impostor", "hi")).unwrap();
        assert_eq!(actions, vec![SessionAction::Broadcast(ChatMessage::text("alice", "hi"))]);
    }

    #[test]
    fn text_that_outgrows_frame_cap_after_rewrite_is_refused() {
        let t0 = Instant::now();
        let long_name = "m".repeat(200);
        let body = "b".repeat(100);

        // Fits as sent, does not fit once the registered name is swapped in
        let inbound = FrameCodec::encode(&ChatMessage::text("x", body.as_str())).len() - 4;
        let cap = u32::try_from(inbound + 50).unwrap();
        let config = SessionConfig { codec: FrameCodec::new(cap), ..Default::default() };

        let mut session = Session::new(1, t0, config);
        session.accept(t0).unwrap();
        session.handle_message(ChatMessage::login(long_name.as_str())).unwrap();
        session.login_outcome(true).unwrap();

        let result = session.handle_message(ChatMessage::text("x", body));
        assert!(matches!(
            result,
            Err(SessionError::Framing(ProtocolError::FrameTooLarge { .. }))
        ));
        assert!(result.is_err_and(|e| e.is_fatal()));
    }

    #[test]
    fn empty_text_body_is_broadcast() {
        let mut session = authenticated("alice");

        let actions = session.handle_message(ChatMessage::text("alice", "")).unwrap();
        assert_eq!(actions, vec![SessionAction::Broadcast(ChatMessage::text("alice", ""))]);
    }

    #[test]
    fn logout_closes_and_deregisters() {
        let mut session = authenticated("alice");

        let actions = session.handle_message(ChatMessage::logout("alice")).unwrap();
        assert_eq!(actions, vec![
            SessionAction::Deregister { username: "alice".to_string() },
            SessionAction::Close { reason: "logout".to_string() },
        ]);
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn close_is_idempotent() {
        let mut session = authenticated("alice");

        assert_eq!(session.close("first").len(), 2);
        assert!(session.close("second").is_empty());
    }

    #[test]
    fn unauthenticated_close_does_not_deregister() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();

        let actions = session.close("bad frame");
        assert_eq!(actions, vec![SessionAction::Close { reason: "bad frame".to_string() }]);
    }

    #[test]
    fn pending_login_does_not_survive_close() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();
        session.handle_message(ChatMessage::login("alice")).unwrap();

        let actions = session.close("gone");
        assert_eq!(actions, vec![SessionAction::Close { reason: "gone".to_string() }]);
        assert!(matches!(session.login_outcome(true), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn messages_after_close_are_rejected() {
        let mut session = authenticated("alice");
        session.close("done");

        let result = session.handle_message(ChatMessage::text("alice", "late"));
        assert!(matches!(result, Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn login_outcome_without_pending_login() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();

        assert!(matches!(session.login_outcome(true), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn accept_twice_fails() {
        let t0 = Instant::now();
        let mut session = Session::new(1, t0, SessionConfig::default());
        session.accept(t0).unwrap();

        assert!(matches!(session.accept(t0), Err(SessionError::InvalidState { .. })));
    }

    #[test]
    fn login_timeout_closes_unauthenticated_session() {
        let t0 = Instant::now();
        let config = SessionConfig { login_timeout: Duration::from_secs(5), ..Default::default() };
        let mut session = Session::new(1, t0, config);
        session.accept(t0).unwrap();

        assert!(session.tick(t0 + Duration::from_secs(4)).is_empty());

        let actions = session.tick(t0 + Duration::from_secs(6));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            SessionAction::Close { reason } if reason.starts_with("login timeout")
        ));
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn authenticated_session_never_times_out() {
        let t0 = Instant::now();
        let config = SessionConfig { login_timeout: Duration::from_secs(5), ..Default::default() };
        let mut session = Session::new(1, t0, config);
        session.accept(t0).unwrap();
        session.handle_message(ChatMessage::login("alice")).unwrap();
        session.login_outcome(true).unwrap();

        assert!(session.tick(t0 + Duration::from_secs(3600)).is_empty());
    }
}
