use serde::{Deserialize, Serialize};

use crate::models::{MediaDescriptor, MessageView, ReadReceipt};

// ── Client → Server Events ──

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    NewMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(default)]
        content: String,
        #[serde(default, rename = "messageType")]
        message_type: Option<String>,
        #[serde(default, rename = "replyToId")]
        reply_to_id: Option<String>,
        #[serde(default)]
        media: Option<MediaDescriptor>,
    },
    MessageUpdated {
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    MessageRead {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Ping,
}

// ── Server → Client Events ──

/// Every frame pushed to a client is `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage {
        message: MessageView,
    },
    /// Content, status or reactions changed.
    MessageUpdated {
        message: MessageView,
    },
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    MessageRead {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "readAt")]
        read_at: String,
        #[serde(rename = "messageIds")]
        message_ids: Vec<String>,
    },
    TypingStart {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    TypingStop {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    Pong,
    Error {
        message: String,
    },
}

impl From<ReadReceipt> for ServerEvent {
    fn from(receipt: ReadReceipt) -> Self {
        ServerEvent::MessageRead {
            conversation_id: receipt.conversation_id,
            user_id: receipt.user_id,
            read_at: receipt.read_at,
            message_ids: receipt.message_ids,
        }
    }
}
