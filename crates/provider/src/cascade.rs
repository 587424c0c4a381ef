use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot};

use super::error::ProviderResult;
use super::events::{
    TurnEvent, TurnHandle, TurnOutcome, TurnRequest, turn_event_channel,
};
use super::remote::{ChatRequest, ProxyClient};
use super::synthetic;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Word-fragment pacing bounds for simulated incremental delivery.
const SIMULATED_DELAY_MIN_MS: u64 = 20;
const SIMULATED_DELAY_MAX_MS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Proxy base URL; empty means no remote tiers are reachable.
    pub base_url: String,
    /// Forces tier 3 for local/offline development.
    pub offline: bool,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            offline: false,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn offline() -> Self {
        Self {
            base_url: String::new(),
            offline: true,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn remote_enabled(&self) -> bool {
        !self.offline && !self.base_url.is_empty()
    }
}

/// Seam between the coordinator and any response source.
pub trait Responder: Send + Sync {
    fn respond(&self, request: TurnRequest) -> TurnHandle;
}

/// Three-tier response source: streaming remote, non-streaming remote,
/// synthetic local generator. Every tier honors the same incremental
/// event contract, and the cascade as a whole never errors outward.
pub struct ResponseProvider {
    config: ProviderConfig,
    client: Option<ProxyClient>,
}

impl ResponseProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = if config.remote_enabled() {
            Some(ProxyClient::new(&config.base_url, config.timeout)?)
        } else {
            None
        };
        Ok(Self { config, client })
    }

    async fn run_turn(
        config: ProviderConfig,
        client: Option<ProxyClient>,
        request: TurnRequest,
        event_tx: mpsc::UnboundedSender<TurnEvent>,
    ) {
        let outcome = Self::resolve(&config, client.as_ref(), &request, &event_tx).await;
        let _ = event_tx.send(TurnEvent::Completed(outcome));
    }

    async fn resolve(
        config: &ProviderConfig,
        client: Option<&ProxyClient>,
        request: &TurnRequest,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> TurnOutcome {
        let Some(client) = client else {
            let reason = if config.offline {
                "offline mode enabled"
            } else {
                "no proxy base URL configured"
            };
            tracing::debug!(reason, "skipping remote tiers");
            return Self::synthesize(request, event_tx, reason.to_string()).await;
        };

        let wire_request = ChatRequest::from_turn(request);

        // Tier 1: streaming endpoint. A buffering transport may hand back
        // the whole text at once; re-deliver it incrementally so consumers
        // never observe a tier difference.
        let stream_failure = match client.stream_chat(&wire_request, event_tx).await {
            Ok(reply) if reply.incremental => {
                return TurnOutcome {
                    text: reply.text,
                    is_real_api: true,
                    fallback_reason: None,
                };
            }
            Ok(reply) => {
                simulate_delivery(&reply.text, event_tx).await;
                return TurnOutcome {
                    text: reply.text,
                    is_real_api: true,
                    fallback_reason: None,
                };
            }
            Err(error) => {
                tracing::warn!(error = %error, "streaming tier failed; trying non-streaming");
                error
            }
        };

        // Tier 2: plain request/response, then simulated incremental delivery.
        let chat_failure = match client.request_chat(&wire_request).await {
            Ok(text) => {
                simulate_delivery(&text, event_tx).await;
                return TurnOutcome {
                    text,
                    is_real_api: true,
                    fallback_reason: Some(format!("stream: {stream_failure}")),
                };
            }
            Err(error) => {
                tracing::warn!(error = %error, "non-streaming tier failed; using local generator");
                error
            }
        };

        let reason = format!("stream: {stream_failure}; chat: {chat_failure}");
        Self::synthesize(request, event_tx, reason).await
    }

    async fn synthesize(
        request: &TurnRequest,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
        reason: String,
    ) -> TurnOutcome {
        let text = synthetic::generate(request);
        synthetic::deliver(&text, event_tx).await;
        TurnOutcome {
            text,
            is_real_api: false,
            fallback_reason: Some(reason),
        }
    }
}

impl Responder for ResponseProvider {
    fn respond(&self, request: TurnRequest) -> TurnHandle {
        let (event_tx, stream, cancel_rx) = turn_event_channel();
        let worker = Box::pin(run_cancellable(
            Self::run_turn(self.config.clone(), self.client.clone(), request, event_tx),
            cancel_rx,
        ));
        TurnHandle { stream, worker }
    }
}

async fn run_cancellable(
    turn: impl Future<Output = ()> + Send,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = &mut cancel_rx => {
            tracing::debug!("turn worker cancelled");
        }
        _ = turn => {}
    }
}

/// Replays a full text as word-ish fragments with small randomized delays,
/// so non-streaming sources still read as incremental downstream.
async fn simulate_delivery(text: &str, event_tx: &mpsc::UnboundedSender<TurnEvent>) {
    for fragment in split_fragments(text) {
        let delay =
            rand::thread_rng().gen_range(SIMULATED_DELAY_MIN_MS..=SIMULATED_DELAY_MAX_MS);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if event_tx.send(TurnEvent::Delta(fragment)).is_err() {
            return;
        }
    }
}

/// Splits text into words with their trailing whitespace attached, so
/// concatenating the fragments reproduces the input exactly.
fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    let mut in_whitespace = false;
    for character in text.chars() {
        let is_whitespace = character.is_whitespace();
        if in_whitespace && !is_whitespace && !current.is_empty() {
            fragments.push(std::mem::take(&mut current));
        }
        current.push(character);
        in_whitespace = is_whitespace;
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}
