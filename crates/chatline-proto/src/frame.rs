//! Length-prefixed framing.
//!
//! [`FrameCodec::decode`] is a pure function over a byte slice: it never
//! blocks, never consumes anything, and reports how many bytes a complete
//! frame occupied so the caller can advance its own buffer. That makes it safe
//! to feed with arbitrary read chunk sizes, from one byte at a time to many
//! frames per read.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    ChatMessage, DEFAULT_MAX_FRAME_SIZE, FrameHeader,
    errors::{ProtocolError, Result},
};

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete, valid frame. The `usize` is the number of bytes it occupied.
    Decoded(ChatMessage, usize),
    /// The buffer holds less than one frame. Retry after more bytes arrive.
    Incomplete,
    /// The frame can never become valid. Fatal for the connection.
    Invalid(ProtocolError),
}

/// Frame encoder/decoder with a configured size cap.
///
/// # Security
///
/// - Size Cap: The declared length is checked as soon as the 4-byte prefix is
///   visible, before any payload is buffered. A hostile length field cannot
///   make the receiver wait for (or allocate) more than `max_frame_size`.
///
/// - Fail Fast: An unknown type tag is reported as soon as the fifth byte
///   arrives, without waiting for the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}

impl FrameCodec {
    /// Create a codec that rejects frames declaring more than `max_frame_size`
    /// bytes after the length prefix.
    #[must_use]
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    /// Configured cap on the declared frame length.
    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Encode a message as one complete frame.
    ///
    /// Deterministic: the same message always yields the same bytes.
    #[must_use]
    pub fn encode(message: &ChatMessage) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(message, &mut buf);
        buf.freeze()
    }

    /// Append one complete frame for `message` to `dst`.
    pub fn encode_into(message: &ChatMessage, dst: &mut impl BufMut) {
        let mut payload = Vec::new();

        // INVARIANT: The payload structs contain only strings and bools, and
        // the writer is an in-memory Vec, so CBOR serialization cannot fail.
        #[allow(clippy::expect_used)]
        message
            .encode_payload(&mut payload)
            .expect("invariant: CBOR encoding of string/bool fields into a Vec is infallible");

        // INVARIANT: Payload is bounded by the caller's strings, which are far
        // below u32::MAX for any message that could be held in memory.
        #[allow(clippy::expect_used)]
        let payload_size =
            u32::try_from(payload.len()).expect("invariant: payload length fits in u32");

        let header = FrameHeader::new(message.message_type(), payload_size);
        debug_assert_eq!(header.payload_size() as usize, payload.len());

        dst.put_slice(&header.to_bytes());
        dst.put_slice(&payload);
    }

    /// Check that `message` would encode to a frame this codec accepts.
    ///
    /// Lets a sender refuse a message before peers would reject it.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the declared length would exceed
    ///   the cap
    pub fn check_size(&self, message: &ChatMessage) -> Result<()> {
        let size = Self::encode(message).len() - FrameHeader::LENGTH_PREFIX_SIZE;
        if size > self.max_frame_size as usize {
            return Err(ProtocolError::FrameTooLarge { size, max: self.max_frame_size as usize });
        }
        Ok(())
    }

    /// Try to decode one frame from the front of `buffer`.
    ///
    /// Never consumes: on [`DecodeOutcome::Decoded`] the caller advances its
    /// buffer by the reported byte count, on [`DecodeOutcome::Incomplete`] it
    /// keeps the bytes and calls again after the next read.
    #[must_use]
    pub fn decode(&self, buffer: &[u8]) -> DecodeOutcome {
        let Some(prefix) = buffer.first_chunk::<{ FrameHeader::LENGTH_PREFIX_SIZE }>() else {
            return DecodeOutcome::Incomplete;
        };

        let length = u32::from_be_bytes(*prefix);
        if length == 0 {
            return DecodeOutcome::Invalid(ProtocolError::EmptyFrame);
        }

        if length > self.max_frame_size {
            return DecodeOutcome::Invalid(ProtocolError::FrameTooLarge {
                size: length as usize,
                max: self.max_frame_size as usize,
            });
        }

        let header = match FrameHeader::from_bytes(buffer) {
            Ok(header) => header,
            Err(_) => return DecodeOutcome::Incomplete,
        };

        let Some(message_type) = header.message_type() else {
            return DecodeOutcome::Invalid(ProtocolError::UnknownMessageType(
                header.message_type_byte(),
            ));
        };

        let frame_size = header.frame_size();
        let Some(payload) = buffer.get(FrameHeader::SIZE..frame_size) else {
            return DecodeOutcome::Incomplete;
        };

        let message = match ChatMessage::decode_payload(message_type, payload) {
            Ok(message) => message,
            Err(e) => return DecodeOutcome::Invalid(e),
        };

        if let Err(e) = message.check() {
            return DecodeOutcome::Invalid(e);
        }

        DecodeOutcome::Decoded(message, frame_size)
    }
}

/// Accumulates inbound bytes across reads and yields complete messages.
///
/// Used identically by the server session and the client connection: read
/// into [`InboundBuffer::buf_mut`], then drain [`InboundBuffer::next_message`]
/// until it returns `Ok(None)`.
#[derive(Debug)]
pub struct InboundBuffer {
    buf: BytesMut,
    codec: FrameCodec,
}

impl InboundBuffer {
    /// Read size reserved ahead of each socket read.
    pub const READ_CHUNK: usize = 4096;

    /// Create an empty buffer decoding with `codec`.
    #[must_use]
    pub fn new(codec: FrameCodec) -> Self {
        Self { buf: BytesMut::with_capacity(Self::READ_CHUNK), codec }
    }

    /// Append received bytes.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Underlying buffer, with at least [`Self::READ_CHUNK`] bytes of spare
    /// capacity, for use as an async read target.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        self.buf.reserve(Self::READ_CHUNK);
        &mut self.buf
    }

    /// Number of buffered bytes not yet consumed by a decoded frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no bytes are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete message, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns the codec's `Invalid` reason. The buffer is left as-is; the
    /// connection should be closed.
    pub fn next_message(&mut self) -> Result<Option<ChatMessage>> {
        match self.codec.decode(&self.buf) {
            DecodeOutcome::Decoded(message, consumed) => {
                self.buf.advance(consumed);
                Ok(Some(message))
            },
            DecodeOutcome::Incomplete => Ok(None),
            DecodeOutcome::Invalid(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageType;

    fn all_variants() -> Vec<ChatMessage> {
        vec![
            ChatMessage::login("alice"),
            ChatMessage::accepted(),
            ChatMessage::rejected("username taken"),
            ChatMessage::logout("alice"),
            ChatMessage::text("alice", "hello, world"),
            ChatMessage::text("alice", ""),
        ]
    }

    #[test]
    fn round_trip_every_variant() {
        let codec = FrameCodec::default();
        for message in all_variants() {
            let wire = FrameCodec::encode(&message);
            assert_eq!(codec.decode(&wire), DecodeOutcome::Decoded(message, wire.len()));
        }
    }

    #[test]
    fn encoded_frame_starts_with_its_length() {
        let wire = FrameCodec::encode(&ChatMessage::text("bob", "hi"));
        let declared = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(declared, wire.len() - 4);
        assert_eq!(wire[4], MessageType::Text.to_u8());
    }

    #[test]
    fn one_byte_at_a_time() {
        let codec = FrameCodec::default();
        let message = ChatMessage::text("alice", "partial reads");
        let wire = FrameCodec::encode(&message);

        for end in 0..wire.len() {
            assert_eq!(codec.decode(&wire[..end]), DecodeOutcome::Incomplete, "prefix {end}");
        }
        assert_eq!(codec.decode(&wire), DecodeOutcome::Decoded(message, wire.len()));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let codec = FrameCodec::default();
        let first = FrameCodec::encode(&ChatMessage::login("alice"));
        let second = FrameCodec::encode(&ChatMessage::text("alice", "x"));

        let mut wire = first.to_vec();
        wire.extend_from_slice(&second[..3]);

        assert_eq!(
            codec.decode(&wire),
            DecodeOutcome::Decoded(ChatMessage::login("alice"), first.len())
        );
    }

    #[test]
    fn oversized_length_is_invalid_before_body_arrives() {
        let codec = FrameCodec::new(1024);
        let prefix = 1025u32.to_be_bytes();

        assert_eq!(
            codec.decode(&prefix),
            DecodeOutcome::Invalid(ProtocolError::FrameTooLarge { size: 1025, max: 1024 })
        );
    }

    #[test]
    fn length_at_cap_is_accepted() {
        let codec = FrameCodec::new(64);
        let message = ChatMessage::text("a", "b");
        let wire = FrameCodec::encode(&message);
        let tight = FrameCodec::new(u32::try_from(wire.len() - 4).unwrap());

        assert!(matches!(codec.decode(&wire), DecodeOutcome::Decoded(..)));
        assert!(matches!(tight.decode(&wire), DecodeOutcome::Decoded(..)));
    }

    #[test]
    fn check_size_matches_decoder_cap() {
        let message = ChatMessage::text("alice", "x".repeat(100));
        let declared = FrameCodec::encode(&message).len() - 4;

        let exact = FrameCodec::new(u32::try_from(declared).unwrap());
        assert_eq!(exact.check_size(&message), Ok(()));

        let short = FrameCodec::new(u32::try_from(declared - 1).unwrap());
        assert_eq!(
            short.check_size(&message),
            Err(ProtocolError::FrameTooLarge { size: declared, max: declared - 1 })
        );
    }

    #[test]
    fn zero_length_is_invalid() {
        let codec = FrameCodec::default();
        assert_eq!(codec.decode(&[0, 0, 0, 0]), DecodeOutcome::Invalid(ProtocolError::EmptyFrame));
    }

    #[test]
    fn unknown_tag_is_invalid_without_payload() {
        let codec = FrameCodec::default();
        // Declares 100 bytes but only the tag has arrived
        let wire = [0, 0, 0, 100, 9];
        assert_eq!(codec.decode(&wire), DecodeOutcome::Invalid(ProtocolError::UnknownMessageType(9)));
    }

    #[test]
    fn garbage_payload_is_invalid() {
        let codec = FrameCodec::default();
        let wire = [0, 0, 0, 3, MessageType::Login.to_u8(), 0xFF, 0xFF];
        assert!(matches!(
            codec.decode(&wire),
            DecodeOutcome::Invalid(ProtocolError::CborDecode(_))
        ));
    }

    #[test]
    fn padded_payload_is_invalid() {
        let codec = FrameCodec::default();
        let mut wire = FrameCodec::encode(&ChatMessage::login("alice")).to_vec();
        wire.push(0x00);
        let length = u32::try_from(wire.len() - 4).unwrap();
        wire[..4].copy_from_slice(&length.to_be_bytes());

        assert!(matches!(
            codec.decode(&wire),
            DecodeOutcome::Invalid(ProtocolError::CborDecode(_))
        ));
    }

    #[test]
    fn empty_username_is_invalid_after_decode() {
        let codec = FrameCodec::default();
        let wire = FrameCodec::encode(&ChatMessage::login(""));
        assert!(matches!(
            codec.decode(&wire),
            DecodeOutcome::Invalid(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn inbound_buffer_drains_many_frames_from_one_read() {
        let mut inbound = InboundBuffer::new(FrameCodec::default());
        let messages = all_variants();
        for message in &messages {
            inbound.extend_from_slice(&FrameCodec::encode(message));
        }

        let mut decoded = Vec::new();
        while let Some(message) = inbound.next_message().unwrap() {
            decoded.push(message);
        }

        assert_eq!(decoded, messages);
        assert!(inbound.is_empty());
    }

    #[test]
    fn inbound_buffer_keeps_partial_frame() {
        let mut inbound = InboundBuffer::new(FrameCodec::default());
        let wire = FrameCodec::encode(&ChatMessage::text("bob", "split"));
        let (head, tail) = wire.split_at(6);

        inbound.extend_from_slice(head);
        assert_eq!(inbound.next_message().unwrap(), None);
        assert_eq!(inbound.len(), 6);

        inbound.extend_from_slice(tail);
        assert_eq!(inbound.next_message().unwrap(), Some(ChatMessage::text("bob", "split")));
        assert!(inbound.is_empty());
    }

    #[test]
    fn inbound_buffer_reports_invalid() {
        let mut inbound = InboundBuffer::new(FrameCodec::new(16));
        inbound.extend_from_slice(&1000u32.to_be_bytes());
        assert!(matches!(inbound.next_message(), Err(ProtocolError::FrameTooLarge { .. })));
    }
}
