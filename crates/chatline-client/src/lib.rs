//! Client
//!
//! Action-based client state machine for the chatline protocol. Tracks the
//! login handshake and translates server messages into application events.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based pattern as
//! `chatline-core`'s server session. It receives events ([`ClientEvent`]),
//! processes them through pure state machine logic, and returns actions
//! ([`ClientAction`]) for the caller to execute.
//!
//! # Components
//!
//! - [`Client`]: Login handshake and message dispatch
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//! - [`ChatEvent`]: Notifications for the user interface
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ClientConnection`]: Client driven over a TCP socket

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, ClientState};
pub use error::ClientError;
pub use event::{ChatEvent, ClientAction, ClientEvent};
