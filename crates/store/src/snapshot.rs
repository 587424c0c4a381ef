use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{
    CreateStateDirectorySnafu, ParseStateFileSnafu, ReadStateFileSnafu, SerializeStateSnafu,
    StoreResult, WriteStateFileSnafu,
};
use super::ids::ChatroomId;
use super::store::ChatStore;
use super::types::{ChatroomRecord, MessageRecord};

/// Durable shape of the conversation state. The pending-stream slot is
/// transient and deliberately absent; it is rebuilt empty on restore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub chatrooms: Vec<ChatroomRecord>,
    pub messages: HashMap<ChatroomId, Vec<MessageRecord>>,
}

impl ChatStore {
    pub fn snapshot(&self) -> StateSnapshot {
        let (chatrooms, messages) = self.state();
        StateSnapshot {
            chatrooms: chatrooms.to_vec(),
            messages: messages.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.replace_state(snapshot.chatrooms, snapshot.messages);
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let mut store = Self::new();
        store.restore(snapshot);
        store
    }
}

/// File-backed snapshot storage: whole-file JSON rewrite on save,
/// missing file treated as a fresh start on load.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> StoreResult<Option<StateSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&self.path).context(ReadStateFileSnafu {
            stage: "load-state-read",
            path: display_path(&self.path),
        })?;

        let snapshot = serde_json::from_str(&raw).context(ParseStateFileSnafu {
            stage: "load-state-parse",
            path: display_path(&self.path),
        })?;

        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: &StateSnapshot) -> StoreResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateStateDirectorySnafu {
                stage: "save-state-create-directory",
                path: display_path(parent),
            })?;
        }

        let serialized = serde_json::to_string(snapshot).context(SerializeStateSnafu {
            stage: "save-state-serialize",
        })?;

        std::fs::write(&self.path, serialized).context(WriteStateFileSnafu {
            stage: "save-state-write",
            path: display_path(&self.path),
        })
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ImageId, MessageId};
    use crate::types::{ImageAttachment, NewMessage, Sender};

    fn scratch_path(label: &str) -> PathBuf {
        std::env::temp_dir()
            .join("glimmer-store-tests")
            .join(format!("{label}-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn snapshot_roundtrip_preserves_ordered_messages_and_images() {
        let mut store = ChatStore::new();
        let chatroom_id = store.create_chatroom("Trip Planning", None);
        store.append_message(
            chatroom_id,
            NewMessage::user("look at this").with_images(vec![ImageAttachment {
                id: ImageId::new_random(),
                src: "data:image/png;base64,aGVsbG8=".to_string(),
                name: "photo.png".to_string(),
            }]),
        );
        store.append_message(chatroom_id, NewMessage::ai("nice photo"));

        let path = scratch_path("roundtrip");
        let file = StateFile::new(&path);
        file.save(&store.snapshot()).expect("save must succeed");

        let restored = file
            .load()
            .expect("load must succeed")
            .expect("file was just written");
        assert_eq!(restored, store.snapshot());

        let reopened = ChatStore::from_snapshot(restored);
        assert_eq!(
            reopened.messages(chatroom_id).map(<[_]>::to_vec),
            store.messages(chatroom_id).map(<[_]>::to_vec)
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_state_file_loads_as_fresh_start() {
        let file = StateFile::new(scratch_path("missing"));
        assert!(file.load().expect("missing file is not an error").is_none());
    }

    #[test]
    fn mid_stream_message_roundtrips_with_partial_text() {
        let mut store = ChatStore::new();
        let chatroom_id = store.create_chatroom("Live", None);
        let message_id = MessageId::new_random();
        store.begin_streaming(chatroom_id, message_id);
        store.append_streaming_chunk(message_id, "partial");

        let restored = ChatStore::from_snapshot(store.snapshot());
        let messages = restored.messages(chatroom_id).expect("room exists");
        assert_eq!(messages[0].text, "partial");
        assert_eq!(messages[0].sender, Sender::Ai);
        // The pending slot itself is transient and not restored.
        assert!(restored.pending_stream().is_none());
    }
}
