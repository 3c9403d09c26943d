//! Chatline wire protocol.
//!
//! Every [`ChatMessage`] travels as one self-delimiting frame:
//!
//! ```text
//! [length: u32 BE][type: u8][payload: length - 1 bytes]
//! ```
//!
//! The length prefix counts everything after itself (type byte plus payload).
//! The type byte selects the variant, and the payload is the CBOR encoding of
//! that variant's fields. The type byte is the only discriminator, so the CBOR
//! body carries no enum tag.
//!
//! # Components
//!
//! - [`ChatMessage`]: The four message kinds exchanged by clients and server
//! - [`FrameHeader`]: Fixed 5-byte prefix (length + type tag)
//! - [`FrameCodec`]: Encoder and non-blocking, partial-read-safe decoder
//! - [`InboundBuffer`]: Byte accumulator that yields complete messages

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
mod frame;
mod header;
mod message;

pub use errors::{ProtocolError, Result};
pub use frame::{DecodeOutcome, FrameCodec, InboundBuffer};
pub use header::FrameHeader;
pub use message::{ChatMessage, Login, LoginStatus, Logout, MessageType, Text};

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 1967;

/// Default cap on a frame's declared length (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Rejection text sent when a username is already registered.
pub const USERNAME_TAKEN: &str = "username taken";
