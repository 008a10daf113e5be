//! Message types: chat-completion messages and the WhatsApp relay wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One chat-completion message. Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Message body of an inbound webhook call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub text: String,
    pub id: String,
    pub replied_id: String,
    pub quoted_message: String,
}

/// Payload the relay POSTs to `/webhook/wa`.
///
/// Everything except `message.text` is passed through untouched; missing
/// fields default to empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub chat_id: String,
    /// Sender JID, e.g. "628123456789@s.whatsapp.net". Replies go here.
    pub from: String,
    pub message: InboundMessage,
    pub pushname: String,
    pub sender_id: String,
    pub timestamp: String,
}

/// Body sent to the relay's `/send/message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayMessage {
    pub phone: String,
    pub message: String,
    pub is_forwarded: bool,
}

impl RelayMessage {
    pub fn reply(phone: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            message: message.into(),
            is_forwarded: false,
        }
    }
}
