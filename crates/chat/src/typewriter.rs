use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use glimmer_provider::TurnWorker;
use glimmer_store::{MessageId, MessageRecord};

/// Per-character reveal pacing. Punctuation gets longer pauses so the
/// cadence reads like typing rather than a uniform drip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingProfile {
    pub base_ms: u64,
    pub space_ms: u64,
    pub clause_ms: u64,
    pub sentence_ms: u64,
    pub newline_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for PacingProfile {
    fn default() -> Self {
        Self {
            base_ms: 30,
            space_ms: 50,
            clause_ms: 80,
            sentence_ms: 100,
            newline_ms: 120,
            jitter_max_ms: 20,
        }
    }
}

impl PacingProfile {
    /// Flat pacing with no jitter, for deterministic scheduling.
    pub fn uniform(delay_ms: u64) -> Self {
        Self {
            base_ms: delay_ms,
            space_ms: delay_ms,
            clause_ms: delay_ms,
            sentence_ms: delay_ms,
            newline_ms: delay_ms,
            jitter_max_ms: 0,
        }
    }

    pub fn delay_for(&self, character: char) -> Duration {
        let millis = match character {
            '\n' => self.newline_ms,
            '.' | '!' | '?' => self.sentence_ms,
            ',' | ';' | ':' => self.clause_ms,
            ' ' => self.space_ms,
            _ => self.base_ms,
        };

        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.jitter_max_ms)
        };
        Duration::from_millis(millis + jitter)
    }
}

/// Trails a streaming message's text with a reveal caret.
///
/// The source text grows as chunks land in the store; the mirror exposes
/// only the prefix revealed so far and advances one character at a time.
/// Already-revealed text never changes, and a new message identity resets
/// the caret to zero.
#[derive(Debug, Default)]
pub struct StreamingMirror {
    message_id: Option<MessageId>,
    target: String,
    revealed_chars: usize,
}

impl StreamingMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts the latest snapshot of the message being revealed. Growth of
    /// the same message keeps the caret; a different message starts over.
    pub fn observe(&mut self, message: &MessageRecord) {
        if self.message_id != Some(message.id) {
            self.message_id = Some(message.id);
            self.revealed_chars = 0;
        }
        self.target = message.text.clone();
        self.revealed_chars = self.revealed_chars.min(self.target.chars().count());
    }

    /// Reveals the next character, returning it for pacing lookups, or
    /// `None` when the caret has caught up with the text received so far.
    pub fn advance(&mut self) -> Option<char> {
        let next = self.target.chars().nth(self.revealed_chars)?;
        self.revealed_chars += 1;
        Some(next)
    }

    /// Jumps the caret to the end of the current target text.
    pub fn reveal_all(&mut self) {
        self.revealed_chars = self.target.chars().count();
    }

    pub fn visible(&self) -> String {
        self.target.chars().take(self.revealed_chars).collect()
    }

    pub fn is_caught_up(&self) -> bool {
        self.revealed_chars >= self.target.chars().count()
    }
}

/// Self-paced reveal of an already-complete text. Each event is a snapshot
/// of the visible prefix; the final event is always the full text.
pub struct ReplayStream {
    snapshots: mpsc::UnboundedReceiver<String>,
    complete_tx: Option<oneshot::Sender<()>>,
}

pub struct ReplayHandle {
    pub stream: ReplayStream,
    pub worker: TurnWorker,
}

impl ReplayStream {
    pub async fn recv(&mut self) -> Option<String> {
        self.snapshots.recv().await
    }

    /// Skips the remaining pacing; the worker emits the full text as its
    /// next and last snapshot.
    pub fn complete_now(&mut self) {
        if let Some(complete_tx) = self.complete_tx.take() {
            let _ = complete_tx.send(());
        }
    }
}

/// Starts a paced reveal of `text`. Dropping the returned stream stops the
/// worker at its next snapshot.
pub fn replay(text: impl Into<String>, profile: PacingProfile) -> ReplayHandle {
    let text = text.into();
    let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
    let (complete_tx, complete_rx) = oneshot::channel();

    let worker: TurnWorker = Box::pin(run_replay(text, profile, snapshot_tx, complete_rx));
    ReplayHandle {
        stream: ReplayStream {
            snapshots: snapshot_rx,
            complete_tx: Some(complete_tx),
        },
        worker,
    }
}

async fn run_replay(
    text: String,
    profile: PacingProfile,
    snapshot_tx: mpsc::UnboundedSender<String>,
    mut complete_rx: oneshot::Receiver<()>,
) {
    let total_chars = text.chars().count();
    let mut visible = String::with_capacity(text.len());

    for (index, character) in text.chars().enumerate() {
        let delay = profile.delay_for(character);
        tokio::select! {
            _ = &mut complete_rx => {
                let _ = snapshot_tx.send(text.clone());
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        visible.push(character);
        let snapshot = if index + 1 == total_chars {
            text.clone()
        } else {
            visible.clone()
        };
        if snapshot_tx.send(snapshot).is_err() {
            return;
        }
    }
}
