pub mod error;
pub mod ids;
pub mod snapshot;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use ids::{ChatroomId, ImageId, MessageId};
pub use snapshot::{StateFile, StateSnapshot};
pub use store::{ChatStore, PendingStream, current_unix_timestamp_ms};
pub use types::{
    CONTEXT_WINDOW_MESSAGES, ChatroomRecord, DEFAULT_CHATROOM_TITLE, ImageAttachment,
    MessageRecord, NewMessage, PREVIEW_MAX_CHARS, Sender, TITLE_FROM_MESSAGE_MAX_CHARS,
    derive_title, preview_text,
};
