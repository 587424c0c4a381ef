pub mod coordinator;
pub mod history;
pub mod session;
pub mod settings;
pub mod typewriter;

pub use coordinator::{
    APOLOGY_TEXT, StreamingCoordinator, TurnError, TurnPhase, TurnReport, TurnResult,
};
pub use history::{DEFAULT_PAGE_SIZE, HistoryLoader, MAX_HISTORY_PAGES, Paginator};
pub use session::{ChatSession, SessionError, SessionResult};
pub use settings::{ChatSettings, SettingsError, SettingsStore};
pub use typewriter::{PacingProfile, ReplayHandle, ReplayStream, StreamingMirror, replay};
