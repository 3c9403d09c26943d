//! Protocol errors.
//!
//! Every variant is fatal for the connection that produced it: a peer that
//! sends a frame we cannot parse has either a bug or hostile intent, and the
//! byte stream cannot be resynchronised after a bad length prefix.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Length prefix declared zero bytes, leaving no room for a type tag.
    #[error("empty frame: length prefix is zero")]
    EmptyFrame,

    /// Length prefix exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared frame length
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Type tag does not name a known message kind.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Payload could not be serialized.
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// Payload bytes are not a valid CBOR encoding of the tagged variant.
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Message decoded but violates a field invariant.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}
