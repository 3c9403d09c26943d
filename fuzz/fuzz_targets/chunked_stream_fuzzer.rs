//! Fuzz target for InboundBuffer under arbitrary read splits
//!
//! # Strategy
//!
//! - Messages: Arbitrary usernames and bodies for every variant
//! - Delivery: The concatenated stream is cut into arbitrary chunk sizes,
//!   including single bytes
//!
//! # Invariants
//!
//! - Every encoded message comes back exactly once, in order
//! - No bytes are left over once the stream is fully delivered
//! - A valid stream never produces an error

#![no_main]

use arbitrary::Arbitrary;
use chatline_proto::{ChatMessage, FrameCodec, InboundBuffer};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum MessageShape {
    Login(String),
    Accepted,
    Rejected(String),
    Logout(String),
    Text(String, String),
}

#[derive(Debug, Clone, Arbitrary)]
struct StreamInput {
    messages: Vec<MessageShape>,
    chunks: Vec<u8>,
}

fn non_empty(name: String) -> String {
    if name.is_empty() { "x".to_string() } else { name }
}

fn build(shape: MessageShape) -> ChatMessage {
    match shape {
        MessageShape::Login(u) => ChatMessage::login(non_empty(u)),
        MessageShape::Accepted => ChatMessage::accepted(),
        MessageShape::Rejected(reason) => ChatMessage::rejected(reason),
        MessageShape::Logout(u) => ChatMessage::logout(non_empty(u)),
        MessageShape::Text(u, body) => ChatMessage::text(non_empty(u), body),
    }
}

fuzz_target!(|input: StreamInput| {
    let messages: Vec<ChatMessage> = input.messages.into_iter().map(build).collect();

    let mut stream = Vec::new();
    for message in &messages {
        stream.extend_from_slice(&FrameCodec::encode(message));
    }

    let mut inbound = InboundBuffer::new(FrameCodec::new(u32::MAX));
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut chunk = input.chunks.iter().cycle();

    while offset < stream.len() {
        let size = chunk.next().map_or(1, |n| usize::from(*n).max(1));
        let end = (offset + size).min(stream.len());
        inbound.extend_from_slice(&stream[offset..end]);
        offset = end;

        while let Some(message) = inbound.next_message().expect("valid stream must decode") {
            decoded.push(message);
        }
    }

    assert_eq!(decoded, messages);
    assert!(inbound.is_empty());
});
