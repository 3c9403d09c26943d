//! Chat message model.
//!
//! [`ChatMessage`] is a closed set of four variants. Receivers dispatch with an
//! exhaustive `match`, so adding a variant is a compile error everywhere a
//! message is handled.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// One-byte type tag identifying a message variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks to join under a username; server announces a join
    Login = 0,
    /// Server's answer to a `Login`
    LoginStatus = 1,
    /// Announces a departure
    Logout = 2,
    /// Chat line
    Text = 3,
}

impl MessageType {
    /// Parse a tag byte. `None` if unrecognized.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Login),
            1 => Some(Self::LoginStatus),
            2 => Some(Self::Logout),
            3 => Some(Self::Text),
            _ => None,
        }
    }

    /// Tag byte written to the wire.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable variant name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::LoginStatus => "LoginStatus",
            Self::Logout => "Logout",
            Self::Text => "Text",
        }
    }
}

/// Request to log in (client → server) or join notice (server → clients).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Username, non-empty
    pub username: String,
}

/// Server's verdict on a login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStatus {
    /// Whether the username was admitted
    pub accepted: bool,
    /// Rejection reason, empty when accepted
    pub error_text: String,
}

/// Departure notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logout {
    /// Username that left, non-empty
    pub username: String,
}

/// A chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    /// Author, non-empty
    pub username: String,
    /// Message body, may be empty
    pub body: String,
}

/// Every message exchanged between clients and the server.
///
/// # Invariants
///
/// - `username` is non-empty for `Login`, `Logout`, and `Text`.
/// - `LoginStatus.error_text` is empty when `accepted` is true.
///
/// Both are checked by [`ChatMessage::validate`], which the codec runs on
/// every decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// Login request / join notice
    Login(Login),
    /// Login verdict
    LoginStatus(LoginStatus),
    /// Departure notice
    Logout(Logout),
    /// Chat line
    Text(Text),
}

impl ChatMessage {
    /// `Login { username }`.
    pub fn login(username: impl Into<String>) -> Self {
        Self::Login(Login { username: username.into() })
    }

    /// `LoginStatus { accepted: true }` with empty error text.
    #[must_use]
    pub fn accepted() -> Self {
        Self::LoginStatus(LoginStatus { accepted: true, error_text: String::new() })
    }

    /// `LoginStatus { accepted: false, error_text: reason }`.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::LoginStatus(LoginStatus { accepted: false, error_text: reason.into() })
    }

    /// `Logout { username }`.
    pub fn logout(username: impl Into<String>) -> Self {
        Self::Logout(Logout { username: username.into() })
    }

    /// `Text { username, body }`.
    pub fn text(username: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Text(Text { username: username.into(), body: body.into() })
    }

    /// Wire tag for this variant.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Login(_) => MessageType::Login,
            Self::LoginStatus(_) => MessageType::LoginStatus,
            Self::Logout(_) => MessageType::Logout,
            Self::Text(_) => MessageType::Text,
        }
    }

    /// Username carried by the message. `None` for `LoginStatus`.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Login(Login { username })
            | Self::Logout(Logout { username })
            | Self::Text(Text { username, .. }) => Some(username.as_str()),
            Self::LoginStatus(_) => None,
        }
    }

    /// Check field invariants.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.check().is_ok()
    }

    /// Field invariants with the reason for the first violation.
    pub(crate) fn check(&self) -> Result<()> {
        match self {
            Self::Login(Login { username })
            | Self::Logout(Logout { username })
            | Self::Text(Text { username, .. }) => {
                if username.is_empty() {
                    return Err(ProtocolError::InvalidMessage("username must not be empty"));
                }
            },
            Self::LoginStatus(status) => {
                if status.accepted && !status.error_text.is_empty() {
                    return Err(ProtocolError::InvalidMessage(
                        "accepted login status must not carry error text",
                    ));
                }
            },
        }
        Ok(())
    }

    /// Encode the variant's fields as CBOR into `dst`.
    ///
    /// Only the inner struct is written; the frame header's type tag already
    /// identifies the variant.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode_payload(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Login(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::LoginStatus(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Logout(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Text(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload according to its type tag.
    ///
    /// Does not run [`Self::validate`]; the codec does that once the variant
    /// is known.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the bytes are not the tagged variant
    pub fn decode_payload(message_type: MessageType, bytes: &[u8]) -> Result<Self> {
        let message = match message_type {
            MessageType::Login => Self::Login(from_cbor(bytes)?),
            MessageType::LoginStatus => Self::LoginStatus(from_cbor(bytes)?),
            MessageType::Logout => Self::Logout(from_cbor(bytes)?),
            MessageType::Text => Self::Text(from_cbor(bytes)?),
        };

        Ok(message)
    }
}

/// The payload must hold exactly one CBOR value.
fn from_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    let mut remaining = bytes;
    let value = ciborium::de::from_reader(&mut remaining)
        .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;

    if !remaining.is_empty() {
        return Err(ProtocolError::CborDecode(format!(
            "{} trailing bytes after payload",
            remaining.len()
        )));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tags_are_stable() {
        assert_eq!(MessageType::Login.to_u8(), 0);
        assert_eq!(MessageType::LoginStatus.to_u8(), 1);
        assert_eq!(MessageType::Logout.to_u8(), 2);
        assert_eq!(MessageType::Text.to_u8(), 3);
        assert_eq!(MessageType::from_u8(4), None);
    }

    #[test]
    fn validate_rejects_empty_username() {
        assert!(!ChatMessage::login("").validate());
        assert!(!ChatMessage::logout("").validate());
        assert!(!ChatMessage::text("", "hi").validate());
        assert!(ChatMessage::login("alice").validate());
    }

    #[test]
    fn empty_body_is_valid() {
        assert!(ChatMessage::text("alice", "").validate());
    }

    #[test]
    fn accepted_status_carries_no_error_text() {
        assert!(ChatMessage::accepted().validate());
        assert!(ChatMessage::rejected("username taken").validate());

        let bogus = ChatMessage::LoginStatus(LoginStatus {
            accepted: true,
            error_text: "nope".to_string(),
        });
        assert!(!bogus.validate());
    }

    #[test]
    fn username_accessor() {
        assert_eq!(ChatMessage::text("bob", "hey").username(), Some("bob"));
        assert_eq!(ChatMessage::accepted().username(), None);
    }

    #[test]
    fn payload_is_tagless_cbor() {
        let message = ChatMessage::text("carol", "hello");
        let mut buf = Vec::new();
        message.encode_payload(&mut buf).unwrap();

        let decoded = ChatMessage::decode_payload(MessageType::Text, &buf).unwrap();
        assert_eq!(decoded, message);

        // Same bytes under a different tag must not decode as Text
        let result = ChatMessage::decode_payload(MessageType::LoginStatus, &buf);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }

    #[test]
    fn trailing_bytes_after_payload_are_rejected() {
        let mut buf = Vec::new();
        ChatMessage::login("alice").encode_payload(&mut buf).unwrap();
        buf.push(0x00);

        let result = ChatMessage::decode_payload(MessageType::Login, &buf);
        assert!(matches!(result, Err(ProtocolError::CborDecode(_))));
    }
}
