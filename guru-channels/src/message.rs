//! Message types exchanged with the messaging provider.

use serde::{Deserialize, Serialize};

/// Where an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// Pushed to the inbound webhook.
    Webhook,
    /// Picked up by the conversation poller.
    Conversation,
}

impl MessageSource {
    /// Get the source as a string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Conversation => "conversation",
        }
    }
}

/// An inbound text message from one sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Provider message ID, or a generated one when the provider sent none
    pub id: String,
    /// Sender identifier, e.g. `whatsapp:+15551234567`
    pub sender: String,
    /// Trimmed message text
    pub text: String,
    /// Where the message came from
    pub source: MessageSource,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
    /// Trace ID for request tracing
    pub trace_id: String,
}

impl ChannelMessage {
    /// Build a message from the webhook's `From` and `Body` fields.
    pub fn from_webhook(id: Option<String>, sender: &str, body: &str) -> Self {
        Self::new(id, sender, body, MessageSource::Webhook)
    }

    /// Build a message from a polled conversation entry.
    pub fn from_conversation(sid: &str, author: &str, body: &str) -> Self {
        Self::new(Some(sid.to_string()), author, body, MessageSource::Conversation)
    }

    fn new(id: Option<String>, sender: &str, body: &str, source: MessageSource) -> Self {
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            sender: sender.trim().to_string(),
            text: body.trim().to_string(),
            source,
            timestamp: chrono::Utc::now().timestamp_millis(),
            trace_id: guru_common::logging::generate_trace_id(),
        }
    }

    /// First characters of the text, for log lines.
    pub fn preview(&self) -> String {
        self.text.chars().take(50).collect()
    }
}

/// Outgoing text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Recipient address
    pub recipient: String,
    /// Message body
    pub text: String,
    /// Inbound message this answers (optional)
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    /// A text message to `recipient`.
    pub fn text(recipient: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    /// Mark this message as an answer to `message_id`.
    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}
