use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

/// One AI turn as observed by the caller: zero or more text fragments in
/// production order, then exactly one terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta(String),
    Completed(TurnOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub text: String,
    /// False whenever the local synthetic generator produced the content,
    /// regardless of why the remote tiers were skipped.
    pub is_real_api: bool,
    pub fallback_reason: Option<String>,
}

/// Store-agnostic sender role for grounding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSender {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextImage {
    pub src: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub text: String,
    pub sender: ContextSender,
    pub images: Vec<ContextImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub message: String,
    pub context: Vec<ContextMessage>,
    pub images: Vec<ContextImage>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<ContextMessage>) -> Self {
        self.context = context;
        self
    }

    pub fn with_images(mut self, images: Vec<ContextImage>) -> Self {
        self.images = images;
        self
    }
}

pub type TurnWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Finite, non-restartable feed of turn events. Dropping it cancels the
/// worker through the oneshot line.
pub struct TurnEventStream {
    events: mpsc::UnboundedReceiver<TurnEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct TurnHandle {
    pub stream: TurnEventStream,
    pub worker: TurnWorker,
}

impl TurnEventStream {
    fn new(events: mpsc::UnboundedReceiver<TurnEvent>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TurnEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for TurnEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub fn turn_event_channel() -> (
    mpsc::UnboundedSender<TurnEvent>,
    TurnEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (event_tx, TurnEventStream::new(event_rx, cancel_tx), cancel_rx)
}
