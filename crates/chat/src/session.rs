use std::collections::HashMap;
use std::sync::Arc;

use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::Mutex;

use glimmer_provider::{
    ContextImage, ContextMessage, ContextSender, Responder, ResponseProvider, TurnRequest,
};
use glimmer_store::{
    CONTEXT_WINDOW_MESSAGES, ChatStore, ChatroomId, ImageAttachment, NewMessage, Sender, StateFile,
    StoreError, derive_title,
};

use crate::coordinator::{StreamingCoordinator, TurnError, TurnReport};
use crate::history::{HistoryLoader, Paginator};
use crate::settings::ChatSettings;

#[derive(Debug, Snafu)]
pub enum SessionError {
    #[snafu(display("conversation state could not be persisted: {source}"))]
    PersistState {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("conversation state could not be restored: {source}"))]
    RestoreState {
        stage: &'static str,
        source: StoreError,
    },
    #[snafu(display("turn failed: {source}"))]
    Turn {
        stage: &'static str,
        source: TurnError,
    },
    #[snafu(display("response provider could not be built: {source}"))]
    BuildProvider {
        stage: &'static str,
        source: glimmer_provider::ProviderError,
    },
    #[snafu(display("no chatroom is selected"))]
    NoActiveChatroom { stage: &'static str },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A whole chat session: the store, the coordinator, the response source,
/// pagination state per chatroom, and snapshot persistence.
///
/// The snapshot is rewritten after every durable mutation; streaming
/// chunks are transient and only the finalized message is persisted.
pub struct ChatSession {
    settings: ChatSettings,
    coordinator: StreamingCoordinator,
    responder: Box<dyn Responder>,
    state_file: StateFile,
    history: HistoryLoader,
    paginators: HashMap<ChatroomId, Paginator>,
    active_chatroom: Option<ChatroomId>,
}

impl ChatSession {
    /// Builds a session whose responder follows the settings: remote
    /// cascade when a proxy is configured, local generator otherwise.
    pub fn from_settings(settings: ChatSettings) -> SessionResult<Self> {
        let provider =
            ResponseProvider::new(settings.to_provider_config()).context(BuildProviderSnafu {
                stage: "session-build-provider",
            })?;
        Ok(Self::with_responder(settings, Box::new(provider)))
    }

    pub fn with_responder(settings: ChatSettings, responder: Box<dyn Responder>) -> Self {
        let state_file = StateFile::new(settings.state_path.clone());
        Self {
            settings,
            coordinator: StreamingCoordinator::new(Arc::new(Mutex::new(ChatStore::new()))),
            responder,
            state_file,
            history: HistoryLoader::new(),
            paginators: HashMap::new(),
            active_chatroom: None,
        }
    }

    pub fn with_history_loader(mut self, history: HistoryLoader) -> Self {
        self.history = history;
        self
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn store(&self) -> Arc<Mutex<ChatStore>> {
        self.coordinator.store()
    }

    pub fn coordinator(&self) -> &StreamingCoordinator {
        &self.coordinator
    }

    pub fn active_chatroom(&self) -> Option<ChatroomId> {
        self.active_chatroom
    }

    /// Restores the conversation snapshot from disk. A missing file is a
    /// fresh start, not an error.
    pub async fn restore(&mut self) -> SessionResult<()> {
        let snapshot = self.state_file.load().context(RestoreStateSnafu {
            stage: "session-restore-load",
        })?;

        if let Some(snapshot) = snapshot {
            let store = self.coordinator.store();
            let mut guard = store.lock().await;
            guard.restore(snapshot);
            self.active_chatroom = guard.chatrooms().first().map(|room| room.id);
            tracing::info!(path = %self.state_file.path().display(), "restored conversation state");
        }
        Ok(())
    }

    pub async fn select_chatroom(&mut self, chatroom_id: ChatroomId) -> bool {
        let store = self.coordinator.store();
        let known = store.lock().await.contains_chatroom(chatroom_id);
        if known {
            self.active_chatroom = Some(chatroom_id);
        }
        known
    }

    pub async fn create_chatroom(&mut self, title: &str) -> SessionResult<ChatroomId> {
        let store = self.coordinator.store();
        let chatroom_id = store.lock().await.create_chatroom(title, None);
        self.active_chatroom = Some(chatroom_id);
        self.persist().await?;
        Ok(chatroom_id)
    }

    pub async fn delete_chatroom(&mut self, chatroom_id: ChatroomId) -> SessionResult<()> {
        let store = self.coordinator.store();
        store.lock().await.delete_chatroom(chatroom_id);
        self.paginators.remove(&chatroom_id);
        if self.active_chatroom == Some(chatroom_id) {
            self.active_chatroom = None;
        }
        self.persist().await
    }

    /// Runs one full user turn: appends the user message (creating a
    /// chatroom titled after it when none is active), then drives the AI
    /// reply to completion. The snapshot is rewritten after the user
    /// message lands and again after the reply finalizes.
    pub async fn send_message(
        &mut self,
        text: &str,
        images: Vec<ImageAttachment>,
    ) -> SessionResult<TurnReport> {
        if text.trim().is_empty() && images.is_empty() {
            return Err(SessionError::Turn {
                stage: "session-send-validate",
                source: TurnError::EmptyMessage {
                    stage: "session-send-validate",
                },
            });
        }

        let chatroom_id = match self.active_chatroom {
            Some(id) => id,
            None => {
                let store = self.coordinator.store();
                let id = store.lock().await.create_chatroom(derive_title(text), None);
                self.active_chatroom = Some(id);
                id
            }
        };

        // Grounding context is the history before this message.
        let context = {
            let store = self.coordinator.store();
            let mut guard = store.lock().await;
            let context = context_window(&guard, chatroom_id);
            guard.append_message(
                chatroom_id,
                NewMessage::user(text).with_images(images.clone()),
            );
            context
        };
        self.persist().await?;

        let request = TurnRequest::new(text)
            .with_context(context)
            .with_images(images.iter().map(context_image).collect());

        let report = self
            .coordinator
            .run_turn(chatroom_id, request, self.responder.as_ref())
            .await
            .context(TurnSnafu {
                stage: "session-send-turn",
            })?;
        self.persist().await?;
        Ok(report)
    }

    /// Loads one more page of older history into the active chatroom.
    /// Returns how many messages were prepended; zero means the backlog
    /// is exhausted.
    pub async fn load_older_history(&mut self) -> SessionResult<usize> {
        let chatroom_id = self.active_chatroom.context(NoActiveChatroomSnafu {
            stage: "session-load-history",
        })?;

        let paginator = self.paginators.entry(chatroom_id).or_default();
        let Some(page) = paginator.claim_next() else {
            return Ok(0);
        };

        let batch = self.history.load_page(page).await;
        let loaded = batch.len();
        {
            let store = self.coordinator.store();
            store.lock().await.prepend_older_messages(chatroom_id, batch);
        }
        self.persist().await?;
        tracing::debug!(%chatroom_id, page, loaded, "older history prepended");
        Ok(loaded)
    }

    pub fn has_more_history(&self, chatroom_id: ChatroomId) -> bool {
        self.paginators
            .get(&chatroom_id)
            .map_or(true, Paginator::has_more)
    }

    async fn persist(&self) -> SessionResult<()> {
        let snapshot = {
            let store = self.coordinator.store();
            let guard = store.lock().await;
            guard.snapshot()
        };
        self.state_file.save(&snapshot).context(PersistStateSnafu {
            stage: "session-persist-save",
        })
    }
}

fn context_window(store: &ChatStore, chatroom_id: ChatroomId) -> Vec<ContextMessage> {
    store
        .recent_messages(chatroom_id, CONTEXT_WINDOW_MESSAGES)
        .into_iter()
        .map(|message| ContextMessage {
            text: message.text,
            sender: match message.sender {
                Sender::User => ContextSender::User,
                Sender::Ai => ContextSender::Ai,
            },
            images: message.images.iter().map(context_image).collect(),
        })
        .collect()
}

fn context_image(image: &ImageAttachment) -> ContextImage {
    ContextImage {
        src: image.src.clone(),
        name: image.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use glimmer_store::ImageId;

    use crate::history::{DEFAULT_PAGE_SIZE, MAX_HISTORY_PAGES};

    fn temp_state_path(label: &str) -> String {
        std::env::temp_dir()
            .join("glimmer-session-tests")
            .join(format!("{label}-{}.json", uuid_suffix()))
            .display()
            .to_string()
    }

    fn uuid_suffix() -> String {
        ChatroomId::new_random().to_string()
    }

    fn offline_settings(label: &str) -> ChatSettings {
        ChatSettings {
            offline_mode: true,
            state_path: temp_state_path(label),
            ..ChatSettings::default()
        }
    }

    fn offline_session(label: &str) -> ChatSession {
        ChatSession::from_settings(offline_settings(label))
            .expect("offline session builds")
            .with_history_loader(
                HistoryLoader::new()
                    .with_load_delay(Duration::from_millis(1))
                    .with_reference_time(1_700_000_000_000),
            )
    }

    #[tokio::test]
    async fn first_message_creates_a_chatroom_titled_after_it() {
        let mut session = offline_session("first-message");
        let report = session
            .send_message("Plan a weekend trip to the coast", Vec::new())
            .await
            .expect("turn succeeds");
        assert!(!report.is_real_api);

        let chatroom_id = session.active_chatroom().expect("chatroom auto-created");
        let store = session.store();
        let store = store.lock().await;
        let room = store.chatroom(chatroom_id).expect("room exists");
        assert!(room.title.starts_with("Plan a weekend trip"));

        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Ai);
        assert!(!messages[1].text.is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_creating_anything() {
        let mut session = offline_session("empty-message");
        let outcome = session.send_message("   ", Vec::new()).await;
        assert!(matches!(outcome, Err(SessionError::Turn { .. })));
        assert!(session.active_chatroom().is_none());
    }

    #[tokio::test]
    async fn image_only_message_is_accepted() {
        let mut session = offline_session("image-only");
        let image = ImageAttachment {
            id: ImageId::new_random(),
            src: "data:image/png;base64,aGVsbG8=".to_string(),
            name: "sketch.png".to_string(),
        };

        let report = session
            .send_message("", vec![image])
            .await
            .expect("turn succeeds");
        assert!(report.text.contains("1 image"));
    }

    #[tokio::test]
    async fn state_survives_a_session_restart() {
        let settings = offline_settings("restart");
        let state_path = settings.state_path.clone();

        let mut session = ChatSession::from_settings(settings).expect("session builds");
        session
            .send_message("Remember this conversation", Vec::new())
            .await
            .expect("turn succeeds");
        let chatroom_id = session.active_chatroom().expect("chatroom exists");
        drop(session);

        let mut revived = ChatSession::from_settings(ChatSettings {
            offline_mode: true,
            state_path,
            ..ChatSettings::default()
        })
        .expect("session builds");
        revived.restore().await.expect("restore succeeds");

        assert_eq!(revived.active_chatroom(), Some(chatroom_id));
        let store = revived.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room restored");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "Remember this conversation");
    }

    #[tokio::test]
    async fn older_history_prepends_and_eventually_runs_out() {
        let mut session = offline_session("pagination");
        session
            .send_message("newest message", Vec::new())
            .await
            .expect("turn succeeds");
        let chatroom_id = session.active_chatroom().expect("chatroom exists");

        for _ in 0..MAX_HISTORY_PAGES {
            let loaded = session.load_older_history().await.expect("page loads");
            assert_eq!(loaded, DEFAULT_PAGE_SIZE);
        }
        let exhausted = session.load_older_history().await.expect("call succeeds");
        assert_eq!(exhausted, 0);
        assert!(!session.has_more_history(chatroom_id));

        let store = session.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(
            messages.len(),
            2 + DEFAULT_PAGE_SIZE * MAX_HISTORY_PAGES as usize
        );
        // The live exchange stays at the tail.
        assert_eq!(messages[messages.len() - 2].text, "newest message");
    }

    #[tokio::test]
    async fn unreachable_proxy_turn_still_fills_history_and_preview() {
        let settings = ChatSettings {
            proxy_base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            state_path: temp_state_path("unreachable-proxy"),
            ..ChatSettings::default()
        };
        let mut session = ChatSession::from_settings(settings).expect("session builds");

        let report = session
            .send_message("How to code a todo list", Vec::new())
            .await
            .expect("turn resolves locally");
        assert!(!report.is_real_api);
        assert!(report.text.contains("step-by-step approach"));

        let chatroom_id = session.active_chatroom().expect("chatroom exists");
        let store = session.store();
        let store = store.lock().await;
        let room = store.chatroom(chatroom_id).expect("room exists");
        assert!(room.last_message.ends_with("..."));
        assert!(room.last_message.chars().count() <= 53);
    }

    #[tokio::test]
    async fn deleting_the_active_chatroom_clears_the_selection() {
        let mut session = offline_session("delete-active");
        let chatroom_id = session
            .create_chatroom("Disposable")
            .await
            .expect("create succeeds");

        session
            .delete_chatroom(chatroom_id)
            .await
            .expect("delete succeeds");
        assert!(session.active_chatroom().is_none());

        let store = session.store();
        assert!(!store.lock().await.contains_chatroom(chatroom_id));
    }

    #[tokio::test]
    async fn load_history_without_a_selection_is_an_error() {
        let mut session = offline_session("no-selection");
        let outcome = session.load_older_history().await;
        assert!(matches!(outcome, Err(SessionError::NoActiveChatroom { .. })));
    }
}
