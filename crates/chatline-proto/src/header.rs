//! Frame header with zero-copy parsing.
//!
//! The header is the 4-byte big-endian length prefix followed by the 1-byte
//! message type tag. Both are read straight out of the receive buffer without
//! copying.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MessageType,
    errors::{ProtocolError, Result},
};

/// Fixed 5-byte frame header (network byte order).
///
/// # Invariants
///
/// - `length` counts the type byte plus the payload, never the prefix itself,
///   so a well-formed frame always has `length >= 1`.
///
/// # Security
///
/// All 5-byte patterns are valid representations, so casting untrusted bytes
/// is safe. Semantic checks (zero length, size cap, unknown tag) are left to
/// [`crate::FrameCodec::decode`], which knows the configured maximum.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    length: [u8; 4],
    message_type: u8,
}

impl FrameHeader {
    /// Size of the serialized header (prefix + type tag).
    pub const SIZE: usize = 5;

    /// Size of the length prefix alone.
    pub const LENGTH_PREFIX_SIZE: usize = 4;

    /// Create a header for a payload of `payload_size` bytes.
    #[must_use]
    pub fn new(message_type: MessageType, payload_size: u32) -> Self {
        Self {
            length: payload_size.saturating_add(1).to_be_bytes(),
            message_type: message_type.to_u8(),
        }
    }

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than [`Self::SIZE`] bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _rest)| header)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Declared length: type byte plus payload.
    #[must_use]
    pub fn length(&self) -> u32 {
        u32::from_be_bytes(self.length)
    }

    /// Payload size in bytes (length minus the type byte).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        self.length().saturating_sub(1)
    }

    /// Raw type tag.
    #[must_use]
    pub fn message_type_byte(&self) -> u8 {
        self.message_type
    }

    /// Type tag as enum. `None` if unrecognized.
    #[must_use]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Total bytes on the wire for this frame, prefix included.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        Self::LENGTH_PREFIX_SIZE + self.length() as usize
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("length", &self.length())
            .field("message_type", &format!("{:#04x}", self.message_type_byte()))
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<FrameHeader>(), FrameHeader::SIZE);
    }

    #[test]
    fn header_layout_is_big_endian_prefix_then_tag() {
        let header = FrameHeader::new(MessageType::Text, 0x0102);
        assert_eq!(header.to_bytes(), [0x00, 0x00, 0x01, 0x03, 0x03]);
        assert_eq!(header.length(), 0x0103);
        assert_eq!(header.payload_size(), 0x0102);
        assert_eq!(header.frame_size(), 4 + 0x0103);
    }

    #[test]
    fn header_round_trip() {
        let header = FrameHeader::new(MessageType::LoginStatus, 42);
        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(&header, parsed);
        assert_eq!(parsed.message_type(), Some(MessageType::LoginStatus));
    }

    #[test]
    fn reject_short_buffer() {
        let result = FrameHeader::from_bytes(&[0, 0, 0]);
        assert_eq!(result, Err(ProtocolError::FrameTooShort { expected: 5, actual: 3 }));
    }

    #[test]
    fn unknown_tag_has_no_enum() {
        let bytes = [0, 0, 0, 1, 0xEE];
        let header = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.message_type(), None);
        assert_eq!(header.message_type_byte(), 0xEE);
    }
}
