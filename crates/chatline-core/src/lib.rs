//! Chatline session logic.
//!
//! Sans-IO state machine for one server-side connection. The runtime feeds it
//! decoded [`ChatMessage`](chatline_proto::ChatMessage)s and the current time,
//! and executes the [`SessionAction`]s it returns: sending replies, claiming or
//! releasing usernames in the registry, broadcasting, and closing the socket.
//!
//! Keeping I/O out of this crate means every transition can be tested with
//! plain function calls and explicit timestamps.

#![forbid(unsafe_code)]

mod error;
pub mod session;

pub use error::SessionError;
pub use session::{
    DEFAULT_LOGIN_TIMEOUT, Session, SessionAction, SessionConfig, SessionId, SessionState,
};
