//! Fuzz target for FrameCodec::decode
//!
//! This fuzzer tests frame decoding with arbitrary byte sequences to find:
//! - Parser crashes or panics
//! - Integer overflows in length calculations
//! - Buffer over-reads
//! - Payloads that decode but break message invariants
//!
//! The fuzzer should NEVER panic. All invalid inputs must come back as
//! `Invalid` or `Incomplete`.

#![no_main]

use chatline_proto::{DecodeOutcome, FrameCodec};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let codec = FrameCodec::default();

    if let DecodeOutcome::Decoded(message, consumed) = codec.decode(data) {
        assert!(consumed <= data.len());
        assert!(message.validate());

        // Anything we accept must re-encode to a frame we also accept
        let wire = FrameCodec::encode(&message);
        assert_eq!(codec.decode(&wire), DecodeOutcome::Decoded(message, wire.len()));
    }
});
