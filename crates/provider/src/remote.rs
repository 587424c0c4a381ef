use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::mpsc;

use super::error::{
    EmptyStreamSnafu, EnvelopeParseSnafu, HttpRequestSnafu, ProviderError, ProviderResult,
};
use super::events::{ContextSender, TurnEvent, TurnRequest};
use super::media::is_forwardable_image;

/// The proxy resends at most this many trailing context messages per turn.
pub const MAX_HISTORY_MESSAGES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct WireImage {
    pub src: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub text: String,
    pub sender: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<WireImage>,
}

/// Request body shared by `/chat` and `/chat-stream`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "conversationHistory")]
    pub conversation_history: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<WireImage>,
}

impl ChatRequest {
    pub fn from_turn(turn: &TurnRequest) -> Self {
        let skip = turn.context.len().saturating_sub(MAX_HISTORY_MESSAGES);
        let conversation_history = turn.context[skip..]
            .iter()
            .map(|message| WireMessage {
                text: message.text.clone(),
                sender: match message.sender {
                    ContextSender::User => "user",
                    ContextSender::Ai => "ai",
                },
                images: forwardable_images(&message.images),
            })
            .collect();

        Self {
            message: turn.message.clone(),
            conversation_history,
            images: forwardable_images(&turn.images),
        }
    }
}

fn forwardable_images(images: &[super::events::ContextImage]) -> Vec<WireImage> {
    images
        .iter()
        .filter(|image| is_forwardable_image(&image.src))
        .map(|image| WireImage {
            src: image.src.clone(),
            name: image.name.clone(),
        })
        .collect()
}

/// Success or error envelope returned by the proxy's JSON endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "isRealAPI")]
    pub is_real_api: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub fallback: bool,
}

/// Outcome of the streaming endpoint: text plus whether it actually
/// arrived incrementally or as one buffered envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedReply {
    pub text: String,
    pub incremental: bool,
}

/// Thin client for the serverless AI proxy.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(HttpRequestSnafu {
                stage: "proxy-client-build",
            })?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Tier 2: single request/response against `POST /chat`.
    pub async fn request_chat(&self, request: &ChatRequest) -> ProviderResult<String> {
        let response = self
            .http
            .post(format!("{}/chat", self.base_url))
            .json(request)
            .send()
            .await
            .context(HttpRequestSnafu { stage: "chat-send" })?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_status(
                "chat-status",
                status.as_u16(),
                response.json::<ChatEnvelope>().await.ok(),
            ));
        }

        let envelope: ChatEnvelope = response.json().await.context(EnvelopeParseSnafu {
            stage: "chat-parse-envelope",
        })?;
        envelope_text("chat-envelope", envelope)
    }

    /// Tier 1: `POST /chat-stream`. Incremental fragments are forwarded as
    /// `Delta` events in read order; a transport that buffered instead
    /// answers with the `/chat` envelope and is reported as non-incremental
    /// so the caller can simulate delivery.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
    ) -> ProviderResult<StreamedReply> {
        let response = self
            .http
            .post(format!("{}/chat-stream", self.base_url))
            .json(request)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "chat-stream-send",
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_status(
                "chat-stream-status",
                status.as_u16(),
                response.json::<ChatEnvelope>().await.ok(),
            ));
        }

        if is_json_content(&response) {
            let envelope: ChatEnvelope = response.json().await.context(EnvelopeParseSnafu {
                stage: "chat-stream-parse-buffered",
            })?;
            let text = envelope_text("chat-stream-buffered", envelope)?;
            return Ok(StreamedReply {
                text,
                incremental: false,
            });
        }

        let mut body = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut accumulated = String::new();
        let mut done = false;

        'read: while let Some(chunk) = body.next().await {
            let chunk = chunk.context(HttpRequestSnafu {
                stage: "chat-stream-read-chunk",
            })?;
            line_buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = line_buffer.find('\n') {
                let line = line_buffer[..line_end].trim().to_string();
                line_buffer.drain(..=line_end);

                match parse_event_line(&line) {
                    EventLine::Done => {
                        done = true;
                        break 'read;
                    }
                    EventLine::Fragment(fragment) => {
                        accumulated.push_str(&fragment);
                        if event_tx.send(TurnEvent::Delta(fragment)).is_err() {
                            // Consumer is gone; stop reading the wire.
                            break 'read;
                        }
                    }
                    EventLine::Ignored => {}
                }
            }
        }

        if !done {
            tracing::debug!(
                accumulated_chars = accumulated.len(),
                "event stream closed without a [DONE] sentinel"
            );
        }

        if accumulated.is_empty() {
            return EmptyStreamSnafu {
                stage: "chat-stream-empty",
            }
            .fail();
        }

        Ok(StreamedReply {
            text: accumulated,
            incremental: true,
        })
    }
}

fn is_json_content(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

fn error_from_status(
    stage: &'static str,
    status: u16,
    envelope: Option<ChatEnvelope>,
) -> ProviderError {
    if status == 429 {
        return ProviderError::RateLimited { stage };
    }

    let (message, fallback) = envelope
        .map(|envelope| {
            (
                envelope.error.unwrap_or_else(|| "unknown proxy error".to_string()),
                envelope.fallback,
            )
        })
        .unwrap_or_else(|| ("unreadable proxy error body".to_string(), false));

    ProviderError::HttpStatus {
        stage,
        status,
        message,
        fallback,
    }
}

fn envelope_text(stage: &'static str, envelope: ChatEnvelope) -> ProviderResult<String> {
    match envelope.text {
        Some(text) if envelope.success && !text.is_empty() => Ok(text),
        _ => Err(ProviderError::EnvelopeRejected {
            stage,
            details: envelope
                .error
                .unwrap_or_else(|| "missing text in success envelope".to_string()),
        }),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum EventLine {
    Fragment(String),
    Done,
    Ignored,
}

/// Event-stream payload shape: `data: {"candidates":[{"content":{"parts":[{"text":...}]}}]}`.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
}

#[derive(Debug, Deserialize)]
struct StreamCandidate {
    content: Option<StreamContent>,
}

#[derive(Debug, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<StreamPart>,
}

#[derive(Debug, Deserialize)]
struct StreamPart {
    text: Option<String>,
}

fn parse_event_line(line: &str) -> EventLine {
    let Some(payload) = line.strip_prefix("data: ") else {
        return EventLine::Ignored;
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return EventLine::Done;
    }

    // Malformed payload lines are skipped rather than failing the stream.
    let Ok(parsed) = serde_json::from_str::<StreamPayload>(payload) else {
        return EventLine::Ignored;
    };

    let fragment = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text);

    match fragment {
        Some(text) if !text.is_empty() => EventLine::Fragment(text),
        _ => EventLine::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ContextImage, ContextMessage};

    #[test]
    fn request_body_serializes_with_proxy_field_names() {
        let request = ChatRequest {
            message: "hello".to_string(),
            conversation_history: vec![WireMessage {
                text: "earlier".to_string(),
                sender: "user",
                images: Vec::new(),
            }],
            images: vec![WireImage {
                src: "data:image/png;base64,aGVsbG8=".to_string(),
                name: "photo.png".to_string(),
            }],
        };

        let serialized = serde_json::to_value(&request).expect("request serializes");
        assert_eq!(serialized["message"], "hello");
        assert_eq!(serialized["conversationHistory"][0]["text"], "earlier");
        assert_eq!(serialized["conversationHistory"][0]["sender"], "user");
        assert!(serialized["conversationHistory"][0].get("images").is_none());
        assert_eq!(serialized["images"][0]["name"], "photo.png");
    }

    #[test]
    fn turn_conversion_limits_history_and_drops_bad_images() {
        let mut turn = TurnRequest::new("latest question");
        turn.context = (0..8)
            .map(|index| ContextMessage {
                text: format!("m{index}"),
                sender: ContextSender::User,
                images: Vec::new(),
            })
            .collect();
        turn.images = vec![
            ContextImage {
                src: "data:image/png;base64,aGVsbG8=".to_string(),
                name: "good.png".to_string(),
            },
            ContextImage {
                src: "https://example.com/bad.png".to_string(),
                name: "bad.png".to_string(),
            },
        ];

        let request = ChatRequest::from_turn(&turn);
        assert_eq!(request.conversation_history.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(request.conversation_history[0].text, "m3");
        assert_eq!(request.images.len(), 1);
        assert_eq!(request.images[0].name, "good.png");
    }

    #[test]
    fn event_line_decodes_fragment_done_and_noise() {
        let fragment = parse_event_line(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
        );
        assert_eq!(fragment, EventLine::Fragment("Hel".to_string()));

        assert_eq!(parse_event_line("data: [DONE]"), EventLine::Done);
        assert_eq!(parse_event_line(": keepalive"), EventLine::Ignored);
        assert_eq!(parse_event_line("data: {not json}"), EventLine::Ignored);
        assert_eq!(
            parse_event_line(r#"data: {"candidates":[]}"#),
            EventLine::Ignored
        );
    }

    #[test]
    fn error_envelope_maps_rate_limit_distinctly() {
        let rate_limited = error_from_status("test", 429, None);
        assert!(rate_limited.is_rate_limited());

        let unavailable = error_from_status(
            "test",
            500,
            Some(ChatEnvelope {
                success: false,
                text: None,
                is_real_api: false,
                error: Some("AI service temporarily unavailable".to_string()),
                fallback: true,
            }),
        );
        match unavailable {
            ProviderError::HttpStatus {
                status, fallback, ..
            } => {
                assert_eq!(status, 500);
                assert!(fallback);
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}
