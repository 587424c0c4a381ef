use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use snafu::Snafu;
use tokio::sync::Mutex;

use glimmer_provider::{Responder, TurnEvent, TurnHandle, TurnRequest};
use glimmer_store::{ChatStore, ChatroomId, MessageId};

/// Shown in place of an AI reply when the provider stream dies without
/// delivering a terminal outcome.
pub const APOLOGY_TEXT: &str = "I apologize, but I'm having trouble processing your message right now. Could you please try again?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingFirstChunk,
    Streaming,
    Finalizing,
}

#[derive(Debug, Snafu)]
pub enum TurnError {
    #[snafu(display("a turn is already in progress"))]
    TurnInProgress { stage: &'static str },
    #[snafu(display("message text is empty"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("chatroom '{chatroom_id}' does not exist"))]
    UnknownChatroom {
        stage: &'static str,
        chatroom_id: ChatroomId,
    },
}

pub type TurnResult<T> = Result<T, TurnError>;

/// What a finished turn produced, for callers that persist or log after
/// the fact. The store already holds the finalized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub message_id: MessageId,
    pub text: String,
    pub is_real_api: bool,
    pub fallback_reason: Option<String>,
}

/// Drives one AI turn at a time from provider events into the store.
///
/// The store's id guard already drops stale chunks, but overlapping turns
/// would still interleave their history appends, so concurrent `run_turn`
/// calls are rejected outright rather than queued.
#[derive(Clone)]
pub struct StreamingCoordinator {
    store: Arc<Mutex<ChatStore>>,
    turn_active: Arc<AtomicBool>,
    phase: Arc<std::sync::Mutex<TurnPhase>>,
}

impl StreamingCoordinator {
    pub fn new(store: Arc<Mutex<ChatStore>>) -> Self {
        Self {
            store,
            turn_active: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(std::sync::Mutex::new(TurnPhase::Idle)),
        }
    }

    pub fn store(&self) -> Arc<Mutex<ChatStore>> {
        Arc::clone(&self.store)
    }

    pub fn is_turn_active(&self) -> bool {
        self.turn_active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> TurnPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs a full turn: registers a pending AI message, feeds provider
    /// deltas into the store as they arrive, and finalizes with the
    /// outcome's authoritative text. A dead stream finalizes with the
    /// apology text instead of leaving a dangling streaming message.
    pub async fn run_turn(
        &self,
        chatroom_id: ChatroomId,
        request: TurnRequest,
        responder: &dyn Responder,
    ) -> TurnResult<TurnReport> {
        if request.message.trim().is_empty() && request.images.is_empty() {
            return EmptyMessageSnafu {
                stage: "run-turn-validate",
            }
            .fail();
        }

        if self
            .turn_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TurnInProgressSnafu {
                stage: "run-turn-guard",
            }
            .fail();
        }
        let _guard = TurnGuard {
            turn_active: &self.turn_active,
            phase: &self.phase,
        };

        let message_id = MessageId::new_random();
        {
            let mut store = self.store.lock().await;
            if !store.contains_chatroom(chatroom_id) {
                return UnknownChatroomSnafu {
                    stage: "run-turn-chatroom",
                    chatroom_id,
                }
                .fail();
            }
            store.begin_streaming(chatroom_id, message_id);
        }
        self.set_phase(TurnPhase::AwaitingFirstChunk);
        tracing::debug!(%chatroom_id, %message_id, "turn started");

        let TurnHandle { mut stream, worker } = responder.respond(request);
        tokio::spawn(worker);

        loop {
            match stream.recv().await {
                Some(TurnEvent::Delta(fragment)) => {
                    self.set_phase(TurnPhase::Streaming);
                    self.store
                        .lock()
                        .await
                        .append_streaming_chunk(message_id, &fragment);
                }
                Some(TurnEvent::Completed(outcome)) => {
                    self.set_phase(TurnPhase::Finalizing);
                    self.store
                        .lock()
                        .await
                        .end_streaming(message_id, Some(&outcome.text));
                    tracing::info!(
                        %message_id,
                        is_real_api = outcome.is_real_api,
                        fallback_reason = outcome.fallback_reason.as_deref(),
                        "turn completed"
                    );
                    return Ok(TurnReport {
                        message_id,
                        text: outcome.text,
                        is_real_api: outcome.is_real_api,
                        fallback_reason: outcome.fallback_reason,
                    });
                }
                None => {
                    self.set_phase(TurnPhase::Finalizing);
                    self.store
                        .lock()
                        .await
                        .end_streaming(message_id, Some(APOLOGY_TEXT));
                    tracing::warn!(%message_id, "provider stream ended without a terminal outcome");
                    return Ok(TurnReport {
                        message_id,
                        text: APOLOGY_TEXT.to_string(),
                        is_real_api: false,
                        fallback_reason: Some(
                            "provider stream ended without a terminal outcome".to_string(),
                        ),
                    });
                }
            }
        }
    }

    fn set_phase(&self, phase: TurnPhase) {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = phase;
    }
}

struct TurnGuard<'a> {
    turn_active: &'a AtomicBool,
    phase: &'a std::sync::Mutex<TurnPhase>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = TurnPhase::Idle;
        self.turn_active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimmer_provider::{TurnOutcome, turn_event_channel};
    use glimmer_store::NewMessage;

    /// Plays back a fixed event script, with an optional hold point that
    /// keeps the turn open until released.
    struct ScriptedResponder {
        events: Vec<TurnEvent>,
        hold: std::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    }

    impl ScriptedResponder {
        fn new(events: Vec<TurnEvent>) -> Self {
            Self {
                events,
                hold: std::sync::Mutex::new(None),
            }
        }

        fn held(events: Vec<TurnEvent>) -> (Self, tokio::sync::oneshot::Sender<()>) {
            let (release_tx, release_rx) = tokio::sync::oneshot::channel();
            let responder = Self {
                events,
                hold: std::sync::Mutex::new(Some(release_rx)),
            };
            (responder, release_tx)
        }
    }

    impl Responder for ScriptedResponder {
        fn respond(&self, _request: TurnRequest) -> TurnHandle {
            let (event_tx, stream, _cancel_rx) = turn_event_channel();
            let events = self.events.clone();
            let hold = self.hold.lock().expect("hold lock").take();
            let worker = Box::pin(async move {
                if let Some(release) = hold {
                    let _ = release.await;
                }
                for event in events {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            });
            TurnHandle { stream, worker }
        }
    }

    fn completed(text: &str, is_real_api: bool) -> TurnEvent {
        TurnEvent::Completed(TurnOutcome {
            text: text.to_string(),
            is_real_api,
            fallback_reason: None,
        })
    }

    async fn coordinator_with_room() -> (StreamingCoordinator, ChatroomId) {
        let store = Arc::new(Mutex::new(ChatStore::new()));
        let chatroom_id = store.lock().await.create_chatroom("Testing", None);
        (StreamingCoordinator::new(store), chatroom_id)
    }

    #[tokio::test]
    async fn deltas_accumulate_and_outcome_text_is_authoritative() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        let responder = ScriptedResponder::new(vec![
            TurnEvent::Delta("Hel".to_string()),
            TurnEvent::Delta("lo".to_string()),
            completed("Hello there", true),
        ]);

        let report = coordinator
            .run_turn(chatroom_id, TurnRequest::new("hi"), &responder)
            .await
            .expect("turn succeeds");

        assert_eq!(report.text, "Hello there");
        assert!(report.is_real_api);

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Hello there");
        assert!(!messages[0].is_streaming);
        assert!(store.pending_stream().is_none());
    }

    #[tokio::test]
    async fn dead_stream_finalizes_with_the_apology() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        // One delta and then the worker ends without a terminal event.
        let responder = ScriptedResponder::new(vec![TurnEvent::Delta("partial".to_string())]);

        let report = coordinator
            .run_turn(chatroom_id, TurnRequest::new("hi"), &responder)
            .await
            .expect("turn resolves");

        assert_eq!(report.text, APOLOGY_TEXT);
        assert!(!report.is_real_api);

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, APOLOGY_TEXT);
        assert!(!messages[0].is_streaming);
    }

    #[tokio::test]
    async fn chunkless_dead_stream_still_lands_the_apology() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        let responder = ScriptedResponder::new(Vec::new());

        coordinator
            .run_turn(chatroom_id, TurnRequest::new("hi"), &responder)
            .await
            .expect("turn resolves");

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        let (held_responder, release_tx) = ScriptedResponder::held(vec![completed("done", true)]);

        let running = coordinator.clone();
        let first = tokio::spawn(async move {
            running
                .run_turn(chatroom_id, TurnRequest::new("first"), &held_responder)
                .await
        });

        // Wait for the first turn to take the guard.
        while !coordinator.is_turn_active() {
            tokio::task::yield_now().await;
        }

        let second = coordinator
            .run_turn(
                chatroom_id,
                TurnRequest::new("second"),
                &ScriptedResponder::new(vec![completed("never", true)]),
            )
            .await;
        assert!(matches!(second, Err(TurnError::TurnInProgress { .. })));

        let _ = release_tx.send(());
        first
            .await
            .expect("task joins")
            .expect("first turn succeeds");
        assert!(!coordinator.is_turn_active());
    }

    #[tokio::test]
    async fn empty_message_without_images_is_rejected() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        let outcome = coordinator
            .run_turn(
                chatroom_id,
                TurnRequest::new("   "),
                &ScriptedResponder::new(vec![completed("unused", true)]),
            )
            .await;
        assert!(matches!(outcome, Err(TurnError::EmptyMessage { .. })));
    }

    #[tokio::test]
    async fn unknown_chatroom_is_rejected_and_releases_the_guard() {
        let store = Arc::new(Mutex::new(ChatStore::new()));
        let coordinator = StreamingCoordinator::new(store);

        let outcome = coordinator
            .run_turn(
                ChatroomId::new_random(),
                TurnRequest::new("hi"),
                &ScriptedResponder::new(vec![completed("unused", true)]),
            )
            .await;
        assert!(matches!(outcome, Err(TurnError::UnknownChatroom { .. })));
        assert!(!coordinator.is_turn_active());
    }

    #[tokio::test]
    async fn turn_leaves_prior_history_untouched() {
        let (coordinator, chatroom_id) = coordinator_with_room().await;
        {
            let store = coordinator.store();
            let mut store = store.lock().await;
            store.append_message(chatroom_id, NewMessage::user("earlier"));
        }

        coordinator
            .run_turn(
                chatroom_id,
                TurnRequest::new("hi"),
                &ScriptedResponder::new(vec![
                    TurnEvent::Delta("reply".to_string()),
                    completed("reply", true),
                ]),
            )
            .await
            .expect("turn succeeds");

        let store = coordinator.store();
        let store = store.lock().await;
        let messages = store.messages(chatroom_id).expect("room exists");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "earlier");
        assert_eq!(messages[1].text, "reply");
    }
}
