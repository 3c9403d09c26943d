//! Property-based tests for the client state machine
//!
//! Arbitrary interleavings of user commands and server messages must never
//! panic, and the client must only ever put well-formed messages on the wire.

use chatline_client::{ChatEvent, Client, ClientAction, ClientEvent, ClientState};
use chatline_proto::ChatMessage;
use proptest::prelude::*;

fn arbitrary_name() -> impl Strategy<Value = String> {
    "[a-z]{0,6}"
}

fn arbitrary_server_message() -> impl Strategy<Value = ChatMessage> {
    prop_oneof![
        Just(ChatMessage::accepted()),
        Just(ChatMessage::rejected("username taken")),
        "[a-z]{1,6}".prop_map(ChatMessage::login),
        "[a-z]{1,6}".prop_map(ChatMessage::logout),
        ("[a-z]{1,6}", "[a-z ]{0,12}").prop_map(|(u, b)| ChatMessage::text(u, b)),
    ]
}

fn arbitrary_event() -> impl Strategy<Value = ClientEvent> {
    prop_oneof![
        Just(ClientEvent::Connected),
        arbitrary_server_message().prop_map(ClientEvent::MessageReceived),
        arbitrary_name().prop_map(|username| ClientEvent::Login { username }),
        "[a-z ]{0,12}".prop_map(|body| ClientEvent::SendText { body }),
        Just(ClientEvent::Disconnect),
        Just(ClientEvent::ConnectionLost { reason: "reset".to_string() }),
    ]
}

proptest! {
    /// Property: every message the client sends passes validation, and
    /// text is only sent while logged in
    #[test]
    fn prop_client_only_sends_valid_messages(
        events in prop::collection::vec(arbitrary_event(), 1..48),
    ) {
        let mut client = Client::new();

        for event in events {
            let was_logged_in = client.is_logged_in();

            let Ok(actions) = client.handle(event) else {
                continue;
            };

            for action in actions {
                if let ClientAction::Send(message) = action {
                    prop_assert!(message.validate());
                    if matches!(message, ChatMessage::Text(_)) {
                        prop_assert!(was_logged_in);
                    }
                }
            }

            prop_assert_eq!(client.username().is_some(), client.state() == ClientState::LoggedIn);
        }
    }

    /// Property: once closed, the client stays closed and reports it once
    #[test]
    fn prop_closed_is_terminal(
        events in prop::collection::vec(arbitrary_event(), 0..32),
    ) {
        let mut client = Client::new();
        client.handle(ClientEvent::Connected).unwrap();
        client.handle(ClientEvent::ConnectionLost { reason: "gone".to_string() }).unwrap();

        for event in events {
            if let Ok(actions) = client.handle(event) {
                let disconnects = actions
                    .iter()
                    .filter(|a| matches!(a, ClientAction::Emit(ChatEvent::Disconnected { .. })))
                    .count();
                prop_assert_eq!(disconnects, 0);
            }
            prop_assert_eq!(client.state(), ClientState::Closed);
        }
    }
}
