//! Fuzz target for the server Session state machine
//!
//! # Strategy
//!
//! - Inputs: Arbitrary interleavings of client messages, registry verdicts,
//!   ticks, and closes
//! - Time: Monotonic offsets around the login timeout
//!
//! # Invariants
//!
//! - Never panics
//! - `Broadcast` only ever carries `Text` under the session's own username
//! - Every broadcast fits the frame size cap
//! - `Deregister` is emitted at most once, and only for the admitted name
//! - Once closing, the session produces no further traffic

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use chatline_core::{Session, SessionAction, SessionConfig, SessionState};
use chatline_proto::{ChatMessage, FrameCodec};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum SessionOp {
    Login(String),
    Text(String, String),
    Logout(String),
    LoginStatus(bool),
    Verdict(bool),
    Tick { advance_ms: u16 },
    Close,
}

fuzz_target!(|ops: Vec<SessionOp>| {
    let start = Instant::now();
    let mut now = start;
    let config =
        SessionConfig { login_timeout: Duration::from_millis(5_000), ..Default::default() };
    let mut session = Session::new(1, now, config);
    session.accept(now).expect("fresh session accepts");

    let mut deregistered = 0;

    for op in ops {
        let closing_before = matches!(session.state(), SessionState::Closing | SessionState::Closed);

        let actions = match op {
            SessionOp::Login(u) => session.handle_message(ChatMessage::login(u)),
            SessionOp::Text(u, body) => session.handle_message(ChatMessage::text(u, body)),
            SessionOp::Logout(u) => session.handle_message(ChatMessage::logout(u)),
            SessionOp::LoginStatus(accepted) => session.handle_message(if accepted {
                ChatMessage::accepted()
            } else {
                ChatMessage::rejected("nope")
            }),
            SessionOp::Verdict(accepted) => session.login_outcome(accepted),
            SessionOp::Tick { advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                Ok(session.tick(now))
            },
            SessionOp::Close => Ok(session.close("fuzz")),
        };

        let Ok(actions) = actions else {
            continue;
        };

        if closing_before {
            assert!(actions.is_empty());
        }

        for action in actions {
            match action {
                SessionAction::Broadcast(ChatMessage::Text(text)) => {
                    assert_eq!(Some(text.username.as_str()), session.username());
                    assert!(FrameCodec::default().check_size(&ChatMessage::Text(text)).is_ok());
                },
                SessionAction::Broadcast(other) => panic!("unexpected broadcast {other:?}"),
                SessionAction::Deregister { username } => {
                    deregistered += 1;
                    assert_eq!(Some(username.as_str()), session.username());
                },
                SessionAction::Send(_) | SessionAction::Register { .. } | SessionAction::Close { .. } => {},
            }
        }

        assert!(deregistered <= 1);
    }
});
