//! Fuzz target for frame length and tag boundary conditions
//!
//! Prevent DoS attacks via malformed length prefixes (HIGH priority)
//!
//! # Strategy
//!
//! - Declared length: Zero, one, at-max, just-over-max, way-over-max,
//!   u32::MAX, random
//! - Type tag: Each valid tag, first invalid tag, max, random
//! - Body: Truncated, exact, with trailing bytes
//!
//! # Invariants
//!
//! - Declared length `> max_frame_size` MUST be `Invalid(FrameTooLarge)` as
//!   soon as the prefix is visible, regardless of what follows
//! - Declared length `0` MUST be `Invalid(EmptyFrame)`
//! - Unknown tag MUST be `Invalid(UnknownMessageType)` once the tag byte is
//!   visible
//! - `Decoded(_, n)` MUST satisfy `n == 4 + declared length`

#![no_main]

use arbitrary::Arbitrary;
use chatline_proto::{DecodeOutcome, FrameCodec, ProtocolError};
use libfuzzer_sys::fuzz_target;

const MAX_FRAME_SIZE: u32 = 4096;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    length: DeclaredLength,
    tag: TagByte,
    body: Vec<u8>,
    truncate: Option<u16>,
}

#[derive(Debug, Clone, Arbitrary)]
enum DeclaredLength {
    Zero,
    One,
    Small(u8),
    AtMax,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum TagByte {
    Valid(u8),
    FirstInvalid,
    Max,
    Random(u8),
}

fuzz_target!(|boundary: BoundaryFrame| {
    let codec = FrameCodec::new(MAX_FRAME_SIZE);

    let length = match boundary.length {
        DeclaredLength::Zero => 0,
        DeclaredLength::One => 1,
        DeclaredLength::Small(n) => u32::from(n),
        DeclaredLength::AtMax => MAX_FRAME_SIZE,
        DeclaredLength::JustOverMax => MAX_FRAME_SIZE + 1,
        DeclaredLength::WayOverMax => MAX_FRAME_SIZE.saturating_add(1_000_000),
        DeclaredLength::MaxU32 => u32::MAX,
        DeclaredLength::Random(n) => n,
    };

    let tag = match boundary.tag {
        TagByte::Valid(n) => n % 4,
        TagByte::FirstInvalid => 4,
        TagByte::Max => u8::MAX,
        TagByte::Random(n) => n,
    };

    let mut buffer = length.to_be_bytes().to_vec();
    buffer.push(tag);
    buffer.extend_from_slice(&boundary.body);
    if let Some(cut) = boundary.truncate {
        buffer.truncate(usize::from(cut));
    }

    let outcome = codec.decode(&buffer);

    if buffer.len() >= 4 && length > MAX_FRAME_SIZE {
        assert!(matches!(outcome, DecodeOutcome::Invalid(ProtocolError::FrameTooLarge { .. })));
        return;
    }

    if buffer.len() >= 4 && length == 0 {
        assert_eq!(outcome, DecodeOutcome::Invalid(ProtocolError::EmptyFrame));
        return;
    }

    if buffer.len() >= 5 && tag > 3 {
        assert_eq!(outcome, DecodeOutcome::Invalid(ProtocolError::UnknownMessageType(tag)));
        return;
    }

    match outcome {
        DecodeOutcome::Decoded(message, consumed) => {
            assert_eq!(consumed, 4 + length as usize);
            assert!(message.validate());
        },
        DecodeOutcome::Incomplete => {
            assert!(buffer.len() < 4 + length as usize);
        },
        DecodeOutcome::Invalid(_) => {
            assert!(buffer.len() >= 4 + length as usize);
        },
    }
});
