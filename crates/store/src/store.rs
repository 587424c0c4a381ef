use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use super::ids::{ChatroomId, MessageId};
use super::types::{
    ChatroomRecord, DEFAULT_CHATROOM_TITLE, MessageRecord, NewMessage, Sender, preview_text,
};

/// The one in-flight AI message under construction. Not yet part of the
/// visible message list until its first chunk arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStream {
    pub message_id: MessageId,
    pub chatroom_id: ChatroomId,
    pub text: String,
    inserted: bool,
}

/// Single source of truth for chatrooms and their messages.
///
/// Message order within a chatroom is insertion order: new messages are
/// appended at the tail, paginated history is prepended in bulk, and the
/// store never re-sorts by timestamp.
#[derive(Debug, Default)]
pub struct ChatStore {
    chatrooms: Vec<ChatroomRecord>,
    messages: HashMap<ChatroomId, Vec<MessageRecord>>,
    // At most one stream may be pending store-wide; chunks bearing any
    // other message id are dropped as stale.
    pending_stream: Option<PendingStream>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chatrooms(&self) -> &[ChatroomRecord] {
        &self.chatrooms
    }

    pub fn chatroom(&self, chatroom_id: ChatroomId) -> Option<&ChatroomRecord> {
        self.chatrooms.iter().find(|room| room.id == chatroom_id)
    }

    pub fn contains_chatroom(&self, chatroom_id: ChatroomId) -> bool {
        self.messages.contains_key(&chatroom_id)
    }

    /// The visible message list for a chatroom, oldest first.
    pub fn messages(&self, chatroom_id: ChatroomId) -> Option<&[MessageRecord]> {
        self.messages.get(&chatroom_id).map(Vec::as_slice)
    }

    pub fn pending_stream(&self) -> Option<&PendingStream> {
        self.pending_stream.as_ref()
    }

    /// The most recent `count` messages of a chatroom, oldest first.
    pub fn recent_messages(&self, chatroom_id: ChatroomId, count: usize) -> Vec<MessageRecord> {
        let Some(messages) = self.messages.get(&chatroom_id) else {
            return Vec::new();
        };
        let skip = messages.len().saturating_sub(count);
        messages[skip..].to_vec()
    }

    /// Inserts a chatroom at the head of the listing with an empty message
    /// list. A blank title falls back to the default.
    pub fn create_chatroom(
        &mut self,
        title: impl Into<String>,
        id: Option<ChatroomId>,
    ) -> ChatroomId {
        let chatroom_id = id.unwrap_or_else(ChatroomId::new_random);
        let mut title = title.into();
        if title.trim().is_empty() {
            title = DEFAULT_CHATROOM_TITLE.to_string();
        }

        let now = current_unix_timestamp_ms();
        self.chatrooms.insert(
            0,
            ChatroomRecord {
                id: chatroom_id,
                title,
                created_at_unix_ms: now,
                last_message: String::new(),
                last_message_time_unix_ms: now,
            },
        );
        self.messages.entry(chatroom_id).or_default();
        chatroom_id
    }

    /// Removes a chatroom and its entire message list. Unknown ids are a
    /// no-op; a pending stream owned by the room is discarded with it.
    pub fn delete_chatroom(&mut self, chatroom_id: ChatroomId) {
        self.chatrooms.retain(|room| room.id != chatroom_id);
        self.messages.remove(&chatroom_id);

        if self
            .pending_stream
            .as_ref()
            .is_some_and(|pending| pending.chatroom_id == chatroom_id)
        {
            self.pending_stream = None;
        }
    }

    /// Appends a finished message at the tail and refreshes the chatroom
    /// preview. Returns `None` when the chatroom does not exist; callers
    /// are expected to check existence first.
    pub fn append_message(
        &mut self,
        chatroom_id: ChatroomId,
        message: NewMessage,
    ) -> Option<MessageRecord> {
        if !self.messages.contains_key(&chatroom_id) {
            return None;
        }

        let record = MessageRecord {
            id: MessageId::new_random(),
            text: message.text,
            sender: message.sender,
            timestamp_unix_ms: current_unix_timestamp_ms(),
            images: message.images,
            is_streaming: false,
        };

        self.touch_preview(chatroom_id, &record.text, record.timestamp_unix_ms);
        let list = self.messages.entry(chatroom_id).or_default();
        list.push(record.clone());
        Some(record)
    }

    /// Registers a pending streaming message. The message stays out of the
    /// visible list until its first chunk; an unfinished previous stream is
    /// orphaned so its late chunks are dropped by the id guard.
    pub fn begin_streaming(&mut self, chatroom_id: ChatroomId, message_id: MessageId) {
        self.pending_stream = Some(PendingStream {
            message_id,
            chatroom_id,
            text: String::new(),
            inserted: false,
        });
    }

    /// Concatenates a chunk onto the pending stream. A mismatched id means
    /// the chunk belongs to a superseded turn and is silently dropped. The
    /// first chunk makes the message visible; later chunks mutate it in
    /// place so the message keeps its identity.
    pub fn append_streaming_chunk(&mut self, message_id: MessageId, chunk: &str) {
        let Some(pending) = self.pending_stream.as_mut() else {
            return;
        };
        if pending.message_id != message_id {
            return;
        }

        pending.text.push_str(chunk);

        if !pending.inserted {
            pending.inserted = true;
            let record = MessageRecord {
                id: pending.message_id,
                text: pending.text.clone(),
                sender: Sender::Ai,
                timestamp_unix_ms: current_unix_timestamp_ms(),
                images: Vec::new(),
                is_streaming: true,
            };
            self.messages
                .entry(pending.chatroom_id)
                .or_default()
                .push(record);
            return;
        }

        let chatroom_id = pending.chatroom_id;
        if let Some(message) = self
            .messages
            .get_mut(&chatroom_id)
            .and_then(|list| list.iter_mut().find(|message| message.id == message_id))
        {
            message.text.push_str(chunk);
        }
    }

    /// Freezes the pending stream. An explicit `final_text` is authoritative
    /// over the accumulated chunks; without one the accumulated text stands
    /// verbatim. Mismatched ids are a no-op.
    pub fn end_streaming(&mut self, message_id: MessageId, final_text: Option<&str>) {
        let Some(pending) = self.pending_stream.as_ref() else {
            return;
        };
        if pending.message_id != message_id {
            return;
        }

        let Some(pending) = self.pending_stream.take() else {
            return;
        };
        let chatroom_id = pending.chatroom_id;

        let resolved_text = match final_text {
            Some(text) if text != pending.text => Some(text.to_string()),
            _ => None,
        };

        if !pending.inserted {
            // The transport only yielded a final blob; land it as a single
            // finalized message so the turn still enters history.
            let text = resolved_text.unwrap_or(pending.text);
            if text.is_empty() {
                return;
            }
            let now = current_unix_timestamp_ms();
            self.touch_preview(chatroom_id, &text, now);
            self.messages.entry(chatroom_id).or_default().push(MessageRecord {
                id: message_id,
                text,
                sender: Sender::Ai,
                timestamp_unix_ms: now,
                images: Vec::new(),
                is_streaming: false,
            });
            return;
        }

        let mut preview_source = None;
        if let Some(message) = self
            .messages
            .get_mut(&chatroom_id)
            .and_then(|list| list.iter_mut().find(|message| message.id == message_id))
        {
            if let Some(text) = resolved_text {
                message.text = text;
            }
            message.is_streaming = false;
            preview_source = Some((message.text.clone(), message.timestamp_unix_ms));
        }

        if let Some((text, _)) = preview_source {
            self.touch_preview(chatroom_id, &text, current_unix_timestamp_ms());
        }
    }

    /// Bulk-prepends older history in the order given. The chatroom preview
    /// reflects only the newest message, so it is left untouched.
    pub fn prepend_older_messages(&mut self, chatroom_id: ChatroomId, batch: Vec<MessageRecord>) {
        let Some(list) = self.messages.get_mut(&chatroom_id) else {
            return;
        };
        list.splice(0..0, batch);
    }

    pub(crate) fn replace_state(
        &mut self,
        chatrooms: Vec<ChatroomRecord>,
        messages: HashMap<ChatroomId, Vec<MessageRecord>>,
    ) {
        self.chatrooms = chatrooms;
        self.messages = messages;
        self.pending_stream = None;
    }

    pub(crate) fn state(&self) -> (&[ChatroomRecord], &HashMap<ChatroomId, Vec<MessageRecord>>) {
        (&self.chatrooms, &self.messages)
    }

    fn touch_preview(&mut self, chatroom_id: ChatroomId, text: &str, timestamp_unix_ms: u64) {
        if let Some(room) = self
            .chatrooms
            .iter_mut()
            .find(|room| room.id == chatroom_id)
        {
            room.last_message = preview_text(text);
            room.last_message_time_unix_ms = timestamp_unix_ms;
        }
    }
}

pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}
