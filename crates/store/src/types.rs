use serde::{Deserialize, Serialize};

use super::ids::{ChatroomId, ImageId, MessageId};

/// Fallback title for chatrooms created without one.
pub const DEFAULT_CHATROOM_TITLE: &str = "New Chat";

/// Sidebar preview length for a chatroom's latest message.
pub const PREVIEW_MAX_CHARS: usize = 50;

/// Derived chatroom titles keep roughly this much of the first message.
pub const TITLE_FROM_MESSAGE_MAX_CHARS: usize = 30;

/// How many trailing messages are resent as grounding context per turn.
pub const CONTEXT_WINDOW_MESSAGES: usize = 5;

/// Store-local sender role, intentionally decoupled from provider-layer role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub id: ImageId,
    /// Self-contained data URI; the snapshot never references external blobs.
    pub src: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    pub timestamp_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewMessage {
    pub text: String,
    pub sender: Sender,
    pub images: Vec<ImageAttachment>,
}

impl Default for Sender {
    fn default() -> Self {
        Self::User
    }
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::User,
            images: Vec::new(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sender: Sender::Ai,
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatroomRecord {
    pub id: ChatroomId,
    pub title: String,
    pub created_at_unix_ms: u64,
    pub last_message: String,
    pub last_message_time_unix_ms: u64,
}

/// Truncates message text into a sidebar preview, `...`-terminated past the cap.
pub fn preview_text(text: &str) -> String {
    let mut preview: String = text.chars().take(PREVIEW_MAX_CHARS).collect();
    if text.chars().count() > PREVIEW_MAX_CHARS {
        preview.push_str("...");
    }
    preview
}

/// Derives a chatroom title from the first message sent into it.
pub fn derive_title(first_message: &str) -> String {
    let trimmed = first_message.trim();
    if trimmed.is_empty() {
        return DEFAULT_CHATROOM_TITLE.to_string();
    }

    let mut title: String = trimmed.chars().take(TITLE_FROM_MESSAGE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_FROM_MESSAGE_MAX_CHARS {
        title.push_str("...");
    }
    title
}
