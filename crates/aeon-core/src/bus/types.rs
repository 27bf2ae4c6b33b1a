//! Bus event types — messages flowing between channels and the agent loop.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Kind of media carried by an inbound message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MediaKind {
    #[default]
    Text,
    Image,
    Audio,
}

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "cli", "system").
    pub channel: String,
    /// Chat/conversation identifier within the channel.
    pub chat_id: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Text content of the message.
    pub content: String,
    /// Media kind of the message payload.
    pub media: MediaKind,
    /// Reference to the media payload (path or URL), if any.
    pub media_ref: Option<String>,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a new text inbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            media: MediaKind::Text,
            media_ref: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach a media payload.
    pub fn with_media(mut self, kind: MediaKind, media_ref: impl Into<String>) -> Self {
        self.media = kind;
        self.media_ref = Some(media_ref.into());
        self
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name. Empty means broadcast to all subscribers.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Suppress user-visible rendering (internal signalling).
    pub silent: bool,
    /// Reserved for status/control hints (e.g. `status = "true"`).
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            silent: false,
            metadata: HashMap::new(),
        }
    }

    /// Create a status-hint message (subscribers may skip rendering it).
    pub fn status(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(channel, chat_id, content);
        msg.metadata.insert("status".to_string(), "true".to_string());
        msg
    }

    /// Whether this message is an internal status hint.
    pub fn is_status(&self) -> bool {
        self.metadata.get("status").map(String::as_str) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("telegram", "chat_99", "user_42", "Hello Aeon!");

        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.sender_id, "user_42");
        assert_eq!(msg.content, "Hello Aeon!");
        assert_eq!(msg.media, MediaKind::Text);
        assert!(msg.media_ref.is_none());
    }

    #[test]
    fn test_inbound_with_media() {
        let msg = InboundMessage::new("telegram", "c", "u", "check this")
            .with_media(MediaKind::Image, "/tmp/photo.jpg");

        assert_eq!(msg.media, MediaKind::Image);
        assert_eq!(msg.media_ref.as_deref(), Some("/tmp/photo.jpg"));
    }

    #[test]
    fn test_outbound_message_creation() {
        let msg = OutboundMessage::new("telegram", "chat_99", "Here's your answer!");

        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "Here's your answer!");
        assert!(!msg.silent);
        assert!(!msg.is_status());
    }

    #[test]
    fn test_status_message() {
        let msg = OutboundMessage::status("cli", "direct", "thinking...");
        assert!(msg.is_status());
        assert_eq!(msg.metadata.get("status").unwrap(), "true");
    }
}
