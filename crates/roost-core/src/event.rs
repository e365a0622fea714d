//! Normalized events delivered by the transport.
//!
//! The transport converts whatever its wire protocol produces into a
//! [`RoomEvent`]: a small envelope (`room_id`, `sender`, `timestamp`) around a
//! tagged [`EventKind`].  The core never looks past this surface.
//!
//! ```text
//! RoomEvent { room_id, sender, timestamp, kind }
//! └── EventKind
//!     ├── Invite
//!     ├── Text { body, msgtype }
//!     ├── Membership { user_id, membership }
//!     ├── Reaction { relates_to, key }
//!     ├── Redaction { redacts }
//!     ├── KeyRequest
//!     └── Unknown { event_type }
//! ```

use serde::{Deserialize, Serialize};

/// One inbound event for a room the bot knows about (or is invited to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Opaque room identifier.
    pub room_id: String,
    /// User that caused the event.
    pub sender: String,
    /// Origin timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    /// Event payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RoomEvent {
    /// Creates an event with a zero timestamp.
    pub fn new(room_id: impl Into<String>, sender: impl Into<String>, kind: EventKind) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            timestamp: 0,
            kind,
        }
    }

    /// Sets the origin timestamp.
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Short tag used in logs and spans.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Returns the text view of this event, if it carries a message body.
    pub fn as_text(&self) -> Option<TextMessage> {
        match &self.kind {
            EventKind::Text { body, msgtype } => Some(TextMessage {
                room_id: self.room_id.clone(),
                sender: self.sender.clone(),
                body: body.clone(),
                msgtype: *msgtype,
                timestamp: self.timestamp,
            }),
            _ => None,
        }
    }
}

/// Tagged event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The bot was invited to the room by `sender`.
    Invite,
    /// A text-bearing message.
    Text {
        /// Plain-text body.
        body: String,
        /// Message flavour.
        #[serde(default)]
        msgtype: TextKind,
    },
    /// Membership of `user_id` changed.
    Membership {
        /// Member whose state changed (may differ from the sender for kicks).
        user_id: String,
        /// New membership.
        membership: Membership,
    },
    /// An annotation on another event.
    Reaction {
        /// Event being reacted to.
        relates_to: String,
        /// Reaction key (usually an emoji).
        key: String,
    },
    /// An event was redacted.
    Redaction {
        /// Redacted event id.
        redacts: String,
    },
    /// An encryption key was requested from the bot's device.
    KeyRequest,
    /// Anything the transport could not classify.
    Unknown {
        /// Raw event type string.
        event_type: String,
    },
}

impl EventKind {
    /// Short tag used in logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::Text { .. } => "text",
            Self::Membership { .. } => "membership",
            Self::Reaction { .. } => "reaction",
            Self::Redaction { .. } => "redaction",
            Self::KeyRequest => "key_request",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Flavour of a text message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    /// Ordinary message.
    #[default]
    Text,
    /// Automated notice (usually from other bots).
    Notice,
    /// `/me` style emote.
    Emote,
}

/// Room membership states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// Joined the room.
    Join,
    /// Left or was kicked.
    Leave,
    /// Was banned.
    Ban,
    /// Was invited.
    Invite,
    /// Asked to join.
    Knock,
}

impl Membership {
    /// Returns `true` when the member is no longer in the room.
    pub fn is_departure(self) -> bool {
        matches!(self, Self::Leave | Self::Ban)
    }
}

/// A text message as seen by plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Room the message was sent in.
    pub room_id: String,
    /// Author of the message.
    pub sender: String,
    /// Plain-text body.
    pub body: String,
    /// Message flavour.
    pub msgtype: TextKind,
    /// Origin timestamp in milliseconds.
    pub timestamp: u64,
}

impl TextMessage {
    /// Creates a plain text message.
    pub fn new(
        room_id: impl Into<String>,
        sender: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            sender: sender.into(),
            body: body.into(),
            msgtype: TextKind::Text,
            timestamp: 0,
        }
    }

    /// Returns the arguments after `command` if the body starts with it.
    ///
    /// `"!echo hi there".command_args("!echo") == Some("hi there")`.
    pub fn command_args(&self, command: &str) -> Option<&str> {
        let rest = self.body.trim_start().strip_prefix(command)?;
        if rest.is_empty() {
            Some(rest)
        } else if rest.starts_with(char::is_whitespace) {
            Some(rest.trim())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let json = r#"{"room_id":"!r","sender":"@a","type":"text","body":"hi"}"#;
        let event: RoomEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind_name(), "text");
        let text = event.as_text().unwrap();
        assert_eq!(text.body, "hi");
        assert_eq!(text.msgtype, TextKind::Text);
    }

    #[test]
    fn test_membership_event() {
        let json = r#"{"room_id":"!r","sender":"@a","type":"membership","user_id":"@b","membership":"ban"}"#;
        let event: RoomEvent = serde_json::from_str(json).unwrap();
        match event.kind {
            EventKind::Membership {
                user_id,
                membership,
            } => {
                assert_eq!(user_id, "@b");
                assert!(membership.is_departure());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_command_args() {
        let msg = TextMessage::new("!r", "@a", "  !echo  hello world ");
        assert_eq!(msg.command_args("!echo"), Some("hello world"));
        assert_eq!(msg.command_args("!ech"), None);
        assert_eq!(TextMessage::new("!r", "@a", "!echo").command_args("!echo"), Some(""));
    }
}
