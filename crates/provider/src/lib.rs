pub mod cascade;
pub mod error;
pub mod events;
pub mod media;
pub mod remote;
pub mod synthetic;

pub use cascade::{DEFAULT_REQUEST_TIMEOUT, ProviderConfig, Responder, ResponseProvider};
pub use error::{ProviderError, ProviderResult};
pub use events::{
    ContextImage, ContextMessage, ContextSender, TurnEvent, TurnEventStream, TurnHandle,
    TurnOutcome, TurnRequest, TurnWorker, turn_event_channel,
};
pub use remote::{ChatEnvelope, ChatRequest, MAX_HISTORY_MESSAGES, ProxyClient, StreamedReply};
